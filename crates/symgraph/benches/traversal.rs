use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use symgraph::config;
use symgraph::types::{ParsedFile, ParsedRelation, ParsedSymbol};
use symgraph::{GraphStore, IndexOptions, Indexer, TraversalEngine};
use tempfile::TempDir;

const FILES: usize = 50;
const FUNCTIONS_PER_FILE: usize = 20;

fn function(name: String, line: i64) -> ParsedSymbol {
    ParsedSymbol {
        name,
        kind: "function".to_string(),
        line_start: Some(line),
        line_end: Some(line + 3),
        ..ParsedSymbol::default()
    }
}

fn call(source: String, target: String, line: i64) -> ParsedRelation {
    ParsedRelation {
        kind: "calls".to_string(),
        source: Some(source),
        target,
        line: Some(line),
    }
}

/// Layered call graph: every function calls two functions of the next file,
/// and every file includes the next header.
fn synthetic_project() -> Vec<ParsedFile> {
    (0..FILES)
        .map(|f| {
            let mut symbols = Vec::with_capacity(FUNCTIONS_PER_FILE);
            let mut relations = Vec::new();
            for i in 0..FUNCTIONS_PER_FILE {
                let line = i64::try_from(i * 5 + 1).unwrap_or(1);
                let name = format!("f{f}_{i}");
                symbols.push(function(name.clone(), line));
                if f + 1 < FILES {
                    let next = f + 1;
                    let a = i % FUNCTIONS_PER_FILE;
                    let b = (i + 7) % FUNCTIONS_PER_FILE;
                    relations.push(call(name.clone(), format!("f{next}_{a}"), line + 1));
                    relations.push(call(name, format!("f{next}_{b}"), line + 2));
                }
            }
            if f + 1 < FILES {
                relations.push(ParsedRelation {
                    kind: "includes".to_string(),
                    source: None,
                    target: format!("mod{}.h", f + 1),
                    line: Some(1),
                });
            }
            ParsedFile {
                path: format!("src/mod{f}.h"),
                content_hash: Some(format!("hash-{f}")),
                language: "c".to_string(),
                lines_total: None,
                symbols,
                relations,
            }
        })
        .collect()
}

fn bench_indexing(c: &mut Criterion) {
    let files = synthetic_project();
    c.bench_function("index_batch_fresh", |b| {
        b.iter(|| {
            let dir = TempDir::new().expect("tempdir");
            let config = config::create_default_config(dir.path());
            let store = GraphStore::open_project(dir.path()).expect("open store");
            let indexer = Indexer::new(&store, &config).expect("indexer");
            black_box(indexer.index_batch(&files, IndexOptions::default(), None));
        });
    });
}

fn bench_traversal(c: &mut Criterion) {
    let dir = TempDir::new().expect("tempdir");
    let config = config::create_default_config(dir.path());
    let store = GraphStore::open_project(dir.path()).expect("open store");
    let indexer = Indexer::new(&store, &config).expect("indexer");
    let report = indexer.index_batch(&synthetic_project(), IndexOptions::default(), None);
    assert!(report.failures.is_empty());

    let engine = TraversalEngine::new(&store, config.traversal);
    let root = engine
        .get_symbol_by_name_qualified("f0_0", None)
        .expect("root symbol");
    let leaf = engine
        .get_symbol_by_name_qualified(&format!("f{}_0", FILES - 1), None)
        .expect("leaf symbol");

    let mut group = c.benchmark_group("traversal");
    for depth in [1usize, 3, 5, 10] {
        group.bench_with_input(BenchmarkId::new("callees", depth), &depth, |b, &depth| {
            b.iter(|| black_box(engine.get_symbol_callees(root.id, Some(depth))));
        });
        group.bench_with_input(BenchmarkId::new("callers", depth), &depth, |b, &depth| {
            b.iter(|| black_box(engine.get_symbol_callers(leaf.id, Some(depth))));
        });
        group.bench_with_input(BenchmarkId::new("include_tree", depth), &depth, |b, &depth| {
            b.iter(|| black_box(engine.get_include_tree("src/mod0.h", Some(depth))));
        });
    }
    group.bench_function("file_impact_mid", |b| {
        b.iter(|| black_box(engine.get_file_impact("src/mod25.h", Some(5))));
    });
    group.finish();
}

criterion_group!(benches, bench_indexing, bench_traversal);
criterion_main!(benches);
