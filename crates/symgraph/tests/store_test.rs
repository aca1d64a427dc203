//! Integration tests for the graph store

mod common;

use common::{calls, function, includes, parsed, setup_project};
use symgraph::types::{FileUpsert, RelationTarget};
use symgraph::{GraphError, GraphStore};

#[test]
fn graph_survives_reopen() {
    let project = setup_project();
    project.index(&parsed(
        "src/a.c",
        "a",
        vec![function("a", 1, 3), function("b", 5, 7)],
        vec![calls("a", "b", 2)],
    ));
    let before = project.store.stats().unwrap();
    let db_path = project.store.db_path().to_path_buf();

    let reopened = GraphStore::open(&db_path).unwrap();
    assert_eq!(reopened.stats().unwrap(), before);
    assert_eq!(before.files, 1);
    assert_eq!(before.symbols, 2);
    assert_eq!(before.relations, 1);
}

#[test]
fn failed_write_leaves_no_trace() {
    let project = setup_project();
    let err = project
        .store
        .write(|conn| {
            symgraph::db::upsert_file(
                conn,
                &FileUpsert {
                    path: "src/half.c".to_string(),
                    content_hash: "h".to_string(),
                    language: "c".to_string(),
                    lines_total: 3,
                    is_critical: false,
                },
                0,
            )?;
            Err::<(), _>(GraphError::Conflict("abort".to_string()))
        })
        .unwrap_err();

    assert!(matches!(err, GraphError::Conflict(_)));
    assert!(project.store.find_file("src/half.c").unwrap().is_none());
    assert_eq!(project.store.stats().unwrap().files, 0);
}

#[test]
fn removing_included_file_demotes_include_edges() {
    let project = setup_project();
    project.index(&parsed("src/lib.h", "l", vec![], vec![]));
    project.index(&parsed(
        "src/main.c",
        "m",
        vec![function("main", 2, 5)],
        vec![includes("lib.h", 1)],
    ));
    let main = project.store.get_file("src/main.c").unwrap();
    let lib = project.store.get_file("src/lib.h").unwrap();
    let edges = project.store.file_relations_from(main.id).unwrap();
    assert_eq!(edges[0].target, RelationTarget::Resolved(lib.id));

    assert!(project.store.remove_file("./src/lib.h").unwrap());
    let edges = project.store.file_relations_from(main.id).unwrap();
    assert_eq!(edges[0].target, RelationTarget::Pending("src/lib.h".to_string()));

    project.index(&parsed("src/lib.h", "l2", vec![], vec![]));
    let lib = project.store.get_file("src/lib.h").unwrap();
    let edges = project.store.file_relations_from(main.id).unwrap();
    assert_eq!(edges[0].target, RelationTarget::Resolved(lib.id));
}

#[test]
fn bracketed_includes_resolve_when_headers_arrive_later() {
    let project = setup_project();
    let main = project.index(&parsed(
        "src/main.c",
        "m",
        vec![function("main", 3, 9)],
        vec![includes("<gpio.h>", 1), includes("\"lcd.h\"", 2)],
    ));
    assert_eq!(main.relations_pending, 2);
    let main = project.store.get_file("src/main.c").unwrap();
    let targets: Vec<RelationTarget> = project
        .store
        .file_relations_from(main.id)
        .unwrap()
        .into_iter()
        .map(|r| r.target)
        .collect();
    assert_eq!(
        targets,
        vec![
            RelationTarget::Pending("gpio.h".to_string()),
            RelationTarget::Pending("lcd.h".to_string()),
        ]
    );

    project.index(&parsed("src/gpio.h", "g", vec![], vec![]));
    project.index(&parsed("src/lcd.h", "l", vec![], vec![]));
    assert_eq!(project.store.stats().unwrap().pending_file_relations, 0);

    let tree = project.engine().get_include_tree("src/main.c", Some(3)).unwrap();
    let paths: Vec<&str> = tree.entities().map(|(_, e)| e.path.as_str()).collect();
    assert_eq!(paths, vec!["src/gpio.h", "src/lcd.h"]);
}

#[test]
fn reader_keeps_its_snapshot_while_a_write_commits() {
    let project = setup_project();
    project.index(&parsed("src/a.c", "a", vec![function("a", 1, 3)], vec![]));

    let count_files = |conn: &rusqlite::Connection| -> symgraph::Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?)
    };
    let (before, during) = project
        .store
        .read(|conn| {
            let before = count_files(conn)?;
            project.index(&parsed("src/b.c", "b", vec![function("b", 1, 3)], vec![]));
            Ok((before, count_files(conn)?))
        })
        .unwrap();
    assert_eq!(before, 1);
    assert_eq!(during, 1);

    assert_eq!(project.store.read(count_files).unwrap(), 2);
    assert_eq!(project.store.stats().unwrap().symbols, 2);
}

#[test]
fn files_under_respects_directory_boundaries() {
    let project = setup_project();
    for path in ["src/lcd/init.c", "src/lcd/draw.c", "src/lcdx/other.c", "src/main.c"] {
        project.index(&parsed(path, "h", vec![], vec![]));
    }

    let under: Vec<String> = project
        .store
        .files_under("src/lcd")
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect();
    assert_eq!(under, vec!["src/lcd/draw.c", "src/lcd/init.c"]);
    assert_eq!(project.store.files_under("").unwrap().len(), 4);
}

#[test]
fn reconcile_resolves_edges_left_pending() {
    let project = setup_project();
    project.index(&parsed("src/x/b.c", "b", vec![function("shared", 1, 3)], vec![]));
    project.index(&parsed("src/y/c.c", "c", vec![function("shared", 1, 3)], vec![]));
    let a = project.index(&parsed(
        "src/a.c",
        "a",
        vec![function("a", 1, 3)],
        vec![calls("a", "shared", 2)],
    ));
    assert_eq!(a.relations_pending, 1);

    // Two equally distant candidates: the edge stays pending.
    let result = project.store.reconcile_all().unwrap();
    assert_eq!(result.scanned, 1);
    assert_eq!(result.resolved, 0);
    assert_eq!(result.remaining, 1);

    project.store.remove_file("src/y/c.c").unwrap();
    let result = project.store.reconcile_all().unwrap();
    assert_eq!(result.resolved, 1);
    assert_eq!(project.store.stats().unwrap().pending_relations, 0);
}

#[test]
fn clear_empties_the_graph() {
    let project = setup_project();
    project.index(&parsed(
        "src/a.c",
        "a",
        vec![function("a", 1, 3)],
        vec![calls("a", "missing", 2), includes("missing.h", 1)],
    ));
    project.store.clear().unwrap();
    assert_eq!(project.store.stats().unwrap(), Default::default());
}
