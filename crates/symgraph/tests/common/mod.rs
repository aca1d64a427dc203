#![allow(dead_code)]

use symgraph::config::{self, GraphConfig};
use symgraph::types::{ParsedFile, ParsedRelation, ParsedSymbol, Symbol};
use symgraph::{GraphStore, IndexOptions, IndexResult, Indexer, TraversalEngine};
use tempfile::TempDir;

pub struct Project {
    pub dir: TempDir,
    pub config: GraphConfig,
    pub store: GraphStore,
}

impl Project {
    pub fn indexer(&self) -> Indexer<'_> {
        Indexer::new(&self.store, &self.config).unwrap()
    }

    pub fn engine(&self) -> TraversalEngine<'_> {
        TraversalEngine::new(&self.store, self.config.traversal)
    }

    pub fn index(&self, file: &ParsedFile) -> IndexResult {
        self.indexer().index_file(file, IndexOptions::default()).unwrap()
    }

    /// The single symbol with this bare name.
    pub fn symbol(&self, name: &str) -> Symbol {
        let mut found = self.store.find_symbols_by_name(name, None).unwrap();
        assert_eq!(found.len(), 1, "expected exactly one `{name}`");
        found.remove(0)
    }
}

pub fn setup_project() -> Project {
    let dir = TempDir::new().unwrap();
    let config = config::create_default_config(dir.path());
    let store = GraphStore::open_project(dir.path()).unwrap();
    Project { dir, config, store }
}

pub fn function(name: &str, line_start: i64, line_end: i64) -> ParsedSymbol {
    symbol(name, "function", line_start, line_end)
}

pub fn symbol(name: &str, kind: &str, line_start: i64, line_end: i64) -> ParsedSymbol {
    ParsedSymbol {
        name: name.to_string(),
        kind: kind.to_string(),
        line_start: Some(line_start),
        line_end: Some(line_end),
        ..ParsedSymbol::default()
    }
}

pub fn calls(source: &str, target: &str, line: i64) -> ParsedRelation {
    relation("calls", source, target, line)
}

pub fn relation(kind: &str, source: &str, target: &str, line: i64) -> ParsedRelation {
    ParsedRelation {
        kind: kind.to_string(),
        source: Some(source.to_string()),
        target: target.to_string(),
        line: Some(line),
    }
}

pub fn includes(target: &str, line: i64) -> ParsedRelation {
    ParsedRelation {
        kind: "includes".to_string(),
        source: None,
        target: target.to_string(),
        line: Some(line),
    }
}

pub fn parsed(
    path: &str,
    hash: &str,
    symbols: Vec<ParsedSymbol>,
    relations: Vec<ParsedRelation>,
) -> ParsedFile {
    ParsedFile {
        path: path.to_string(),
        content_hash: Some(hash.to_string()),
        language: "c".to_string(),
        lines_total: None,
        symbols,
        relations,
    }
}
