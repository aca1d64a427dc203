#![forbid(unsafe_code)]

//! Persisted code-dependency graph with bounded traversal queries.
//!
//! Parser output ([`types::ParsedFile`]) is applied by the [`Indexer`] to a
//! [`GraphStore`]; the [`TraversalEngine`] answers callers / callees /
//! impact / include-tree / type-user questions over the stored graph.

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod logging;
pub mod queries;
pub mod resolution;
pub mod store;
pub mod types;
pub mod utils;

pub use config::GraphConfig;
pub use error::{GraphError, ParseInputError, Result};
pub use indexer::{BatchReport, IndexOptions, IndexResult, Indexer, SourceParser};
pub use queries::TraversalEngine;
pub use store::GraphStore;
