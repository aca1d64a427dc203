#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::SymbolKind;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn hash_sha256(input: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

pub fn definition_hash(qualified_name: &str, kind: SymbolKind, signature: Option<&str>) -> String {
    let seed = format!("{qualified_name}|{kind:?}|{}", signature.unwrap_or_default());
    hash_sha256(&seed)
}

pub fn default_qualified_name(file_path: &str, name: &str) -> String {
    format!("{file_path}::{name}")
}

/// Store paths use forward slashes and no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let mut trimmed = unified.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
