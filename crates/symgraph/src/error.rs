#![forbid(unsafe_code)]

use serde::Serialize;
use thiserror::Error;

use crate::types::Symbol;

pub type Result<T, E = GraphError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("symbol `{name}` is ambiguous: {} candidates, pass a file or module hint", .candidates.len())]
    AmbiguousSymbol {
        name: String,
        candidates: Vec<Symbol>,
    },

    /// A structural invariant was violated during a write. The enclosing
    /// transaction has been rolled back.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid parser input for {path}: {message}")]
    ParseInput { path: String, message: String },

    #[error("database error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to write config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }
}

impl From<rusqlite::Error> for GraphError {
    fn from(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            Self::Conflict(err.to_string())
        } else {
            Self::Sqlite(err)
        }
    }
}

/// A single malformed symbol or relation entry from the parser. Logged and
/// skipped; never fails the file it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{entry}: {reason}")]
pub struct ParseInputError {
    pub entry: String,
    pub reason: String,
}

impl ParseInputError {
    pub fn new(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}
