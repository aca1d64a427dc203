//! Integration tests for incremental indexing

mod common;

use std::fs;

use common::{calls, function, includes, parsed, relation, setup_project, symbol};
use symgraph::types::{ParsedFile, RelationTarget, SymbolKind};
use symgraph::{GraphError, IndexOptions, Result};

#[test]
fn reindexing_unchanged_file_is_a_noop() {
    let project = setup_project();
    let file = parsed(
        "src/a.c",
        "h1",
        vec![function("main", 1, 5), function("helper", 7, 9)],
        vec![calls("main", "helper", 2)],
    );

    let first = project.index(&file);
    assert!(!first.skipped);
    assert_eq!(first.symbols_added, 2);
    assert_eq!(first.relations_added, 1);
    assert_eq!(first.relations_pending, 0);
    let before = project.store.stats().unwrap();

    let second = project.index(&file);
    assert!(second.skipped);
    assert_eq!(second.symbols_added + second.symbols_updated + second.symbols_removed, 0);
    assert_eq!(project.store.stats().unwrap(), before);

    let forced = project
        .indexer()
        .index_file(&file, IndexOptions { force: true })
        .unwrap();
    assert!(!forced.skipped);
    assert_eq!(forced.symbols_added, 0);
    assert_eq!(forced.symbols_updated, 0);
    assert_eq!(forced.symbols_removed, 0);
    assert_eq!(forced.relations_added, 1);
    assert_eq!(project.store.stats().unwrap(), before);
}

#[test]
fn removed_symbol_drops_outgoing_and_demotes_incoming_edges() {
    let project = setup_project();
    project.index(&parsed(
        "src/lcd.c",
        "v1",
        vec![function("lcd_init", 1, 5), function("delay", 7, 9)],
        vec![calls("lcd_init", "delay", 3)],
    ));
    project.index(&parsed(
        "src/main.c",
        "m1",
        vec![function("main", 1, 4)],
        vec![calls("main", "lcd_init", 2)],
    ));

    let main = project.symbol("main");
    let lcd_init = project.symbol("lcd_init");
    let edges = project.store.outgoing_relations(main.id).unwrap();
    assert_eq!(edges[0].target, RelationTarget::Resolved(lcd_init.id));
    let edge_id = edges[0].id;

    let result = project.index(&parsed("src/lcd.c", "v2", vec![function("delay", 7, 9)], vec![]));
    assert_eq!(result.symbols_removed, 1);
    assert!(project.store.find_symbols_by_name("lcd_init", None).unwrap().is_empty());

    let edges = project.store.outgoing_relations(main.id).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].id, edge_id);
    assert_eq!(
        edges[0].target,
        RelationTarget::Pending("src/lcd.c::lcd_init".to_string())
    );
    assert_eq!(edges[0].line, Some(2));

    let stats = project.store.stats().unwrap();
    assert_eq!(stats.relations, 1);
    assert_eq!(stats.pending_relations, 1);
    assert!(matches!(
        project.store.get_symbol(lcd_init.id),
        Err(GraphError::NotFound { .. })
    ));

    // Bringing the definition back resolves the same edge in place.
    let restored = project.index(&parsed(
        "src/lcd.c",
        "v3",
        vec![function("lcd_init", 1, 5), function("delay", 7, 9)],
        vec![],
    ));
    assert_eq!(restored.deferred_resolved, 1);
    let new_init = project.symbol("lcd_init");
    let edges = project.store.outgoing_relations(main.id).unwrap();
    assert_eq!(edges[0].id, edge_id);
    assert_eq!(edges[0].target, RelationTarget::Resolved(new_init.id));
}

#[test]
fn changed_signature_updates_symbol_in_place() {
    let project = setup_project();
    let mut delay = function("delay", 7, 9);
    delay.signature = Some("void delay(void)".to_string());
    project.index(&parsed("src/lcd.c", "v1", vec![delay.clone()], vec![]));
    let before = project.symbol("delay");

    delay.signature = Some("void delay(int ms)".to_string());
    let result = project.index(&parsed("src/lcd.c", "v2", vec![delay], vec![]));
    assert_eq!(result.symbols_updated, 1);
    assert_eq!(result.symbols_added, 0);

    let after = project.symbol("delay");
    assert_eq!(after.id, before.id);
    assert_ne!(after.definition_hash, before.definition_hash);
    assert_eq!(after.signature.as_deref(), Some("void delay(int ms)"));
}

#[test]
fn forward_references_resolve_when_target_is_indexed() {
    let project = setup_project();
    let first = project.index(&parsed(
        "src/main.c",
        "m1",
        vec![function("main", 1, 4)],
        vec![calls("main", "uart_write", 2), includes("uart.h", 1)],
    ));
    assert_eq!(first.relations_pending, 2);

    project.index(&parsed("src/uart.h", "h1", vec![], vec![]));
    let second = project.index(&parsed(
        "src/uart.c",
        "u1",
        vec![function("uart_write", 3, 8)],
        vec![includes("uart.h", 1)],
    ));
    assert_eq!(second.relations_pending, 0);
    assert_eq!(second.deferred_resolved, 1);

    let stats = project.store.stats().unwrap();
    assert_eq!(stats.pending_relations, 0);
    assert_eq!(stats.pending_file_relations, 0);
}

#[test]
fn malformed_entries_are_reported_not_fatal() {
    let project = setup_project();
    let mut file = parsed(
        "src/a.c",
        "h1",
        vec![function("main", 1, 5), function("", 7, 9)],
        vec![calls("main", "", 2), calls("ghost", "main", 3)],
    );
    file.symbols.push(symbol("no_line", "function", 0, 0));
    file.symbols.last_mut().unwrap().line_start = None;

    let result = project.index(&file);
    assert_eq!(result.symbols_added, 1);
    assert_eq!(result.relations_added, 0);
    assert_eq!(result.warnings.len(), 4);
}

#[test]
fn relation_kind_limits_candidates() {
    let project = setup_project();
    project.index(&parsed(
        "src/types.h",
        "t1",
        vec![symbol("config", "struct", 1, 5)],
        vec![],
    ));
    project.index(&parsed(
        "src/app.c",
        "a1",
        vec![function("config", 1, 3), function("run", 5, 9)],
        vec![
            relation("has_param_type", "run", "config", 5),
            calls("run", "config", 6),
        ],
    ));

    let run = project.symbol("run");
    let edges = project.store.outgoing_relations(run.id).unwrap();
    let fn_config = project
        .store
        .find_symbols_by_name("config", Some(SymbolKind::Function))
        .unwrap()[0]
        .id;
    let struct_config = project
        .store
        .find_symbols_by_name("config", Some(SymbolKind::Struct))
        .unwrap()[0]
        .id;
    assert_eq!(edges[0].target, RelationTarget::Resolved(struct_config));
    assert_eq!(edges[1].target, RelationTarget::Resolved(fn_config));
}

#[test]
fn critical_paths_flag_files() {
    let project = setup_project();
    project.index(&parsed("src/auth/login.c", "h", vec![function("login", 1, 9)], vec![]));
    project.index(&parsed("src/ui/view.c", "h", vec![function("draw", 1, 9)], vec![]));

    assert!(project.store.get_file("src/auth/login.c").unwrap().is_critical);
    assert!(!project.store.get_file("src/ui/view.c").unwrap().is_critical);

    let critical = project.engine().critical_symbols().unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].name, "login");
}

#[test]
fn remove_file_and_prune_stale() {
    let project = setup_project();
    project.index(&parsed("src/a.c", "a", vec![function("a", 1, 3)], vec![calls("a", "b", 2)]));
    project.index(&parsed("src/b.c", "b", vec![function("b", 1, 3)], vec![]));
    project.index(&parsed("src/c.c", "c", vec![function("c", 1, 3)], vec![]));
    assert_eq!(project.store.stats().unwrap().pending_relations, 0);

    assert!(project.indexer().remove_file("src/b.c").unwrap());
    assert!(!project.store.remove_file("src/b.c").unwrap());
    let stats = project.store.stats().unwrap();
    assert_eq!(stats.files, 2);
    assert_eq!(stats.pending_relations, 1);

    assert_eq!(project.store.mark_stale(&["src/c.c".to_string()]).unwrap(), 1);
    assert!(project.store.get_file("src/c.c").unwrap().is_stale);
    // Stale files keep their symbols until pruned.
    assert_eq!(project.store.find_symbols_by_name("c", None).unwrap().len(), 1);

    let pruned = project.store.prune_stale().unwrap();
    assert_eq!(pruned, vec!["src/c.c".to_string()]);
    assert!(project.store.find_file("src/c.c").unwrap().is_none());
    assert_eq!(project.store.stats().unwrap().files, 1);
}

#[test]
fn stale_file_is_reindexed_even_with_same_hash() {
    let project = setup_project();
    let file = parsed("src/a.c", "same", vec![function("a", 1, 3)], vec![]);
    project.index(&file);
    project.store.mark_stale(&["src/a.c".to_string()]).unwrap();

    let result = project.index(&file);
    assert!(!result.skipped);
    assert!(!project.store.get_file("src/a.c").unwrap().is_stale);
}

#[test]
fn supplied_hash_and_line_count_take_precedence_over_the_source_file() {
    let project = setup_project();
    let root = project.dir.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(root.join("src/a.c"), "int a;\nint b;\nint c;\n").unwrap();
    fs::write(root.join("src/b.c"), "int a;\nint b;\nint c;\n").unwrap();

    let mut supplied = parsed("src/a.c", "parser-hash", vec![function("a", 1, 1)], vec![]);
    supplied.lines_total = Some(42);
    project.index(&supplied);
    let record = project.store.get_file("src/a.c").unwrap();
    assert_eq!(record.content_hash, "parser-hash");
    assert_eq!(record.lines_total, 42);

    project.index(&parsed("src/b.c", "parser-hash", vec![function("b", 1, 1)], vec![]));
    assert_eq!(project.store.get_file("src/b.c").unwrap().lines_total, 3);
}

fn fake_parser(path: &str, content: &str) -> Result<ParsedFile> {
    if content.contains("#error") {
        return Err(GraphError::ParseInput {
            path: path.to_string(),
            message: "unparseable".to_string(),
        });
    }
    let mut symbols = Vec::new();
    let mut relations = Vec::new();
    let mut current = None;
    for (idx, line) in content.lines().enumerate() {
        let line_no = i64::try_from(idx).unwrap() + 1;
        if let Some(name) = line.strip_prefix("fn ") {
            symbols.push(function(name.trim(), line_no, line_no + 1));
            current = Some(name.trim().to_string());
        } else if let Some(target) = line.strip_prefix("  call ") {
            if let Some(source) = &current {
                relations.push(calls(source, target.trim(), line_no));
            }
        } else if let Some(target) = line.strip_prefix("include ") {
            relations.push(includes(target.trim(), line_no));
        }
    }
    Ok(ParsedFile {
        path: path.to_string(),
        language: String::new(),
        symbols,
        relations,
        ..ParsedFile::default()
    })
}

#[test]
fn index_directory_parses_tree_and_isolates_failures() {
    let project = setup_project();
    let root = project.dir.path();
    fs::create_dir_all(root.join("src/drv")).unwrap();
    fs::create_dir_all(root.join("build")).unwrap();
    fs::write(root.join("src/main.c"), "include drv/lcd.h\nfn main\n  call lcd_init\n").unwrap();
    fs::write(root.join("src/drv/lcd.h"), "").unwrap();
    fs::write(root.join("src/drv/lcd.c"), "fn lcd_init\n  call delay\nfn delay\n").unwrap();
    fs::write(root.join("src/broken.c"), "#error nope\n").unwrap();
    fs::write(root.join("build/gen.c"), "fn generated\n").unwrap();
    fs::write(root.join("notes.txt"), "fn ignored\n").unwrap();

    let indexer = project.indexer();
    let report = indexer
        .index_directory(&fake_parser, IndexOptions::default(), None)
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "src/broken.c");
    assert_eq!(report.indexed(), 3);
    assert!(project.store.find_file("build/gen.c").unwrap().is_none());
    assert_eq!(project.store.get_file("src/main.c").unwrap().language, "c");

    let stats = project.store.stats().unwrap();
    assert_eq!(stats.pending_relations, 0);
    assert_eq!(stats.pending_file_relations, 0);

    // Second run: nothing changed on disk.
    let again = indexer
        .index_directory(&fake_parser, IndexOptions::default(), None)
        .unwrap();
    assert_eq!(again.indexed(), 0);
    assert_eq!(again.skipped(), 3);

    // A deleted file is marked stale, not removed.
    fs::remove_file(root.join("src/drv/lcd.c")).unwrap();
    let after_delete = indexer
        .index_directory(&fake_parser, IndexOptions::default(), None)
        .unwrap();
    assert_eq!(after_delete.stale_marked, 1);
    let lcd = project.store.get_file("src/drv/lcd.c").unwrap();
    assert!(lcd.is_stale);
    assert_eq!(project.store.symbols_in_file(lcd.id).unwrap().len(), 2);
}
