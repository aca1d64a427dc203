#![forbid(unsafe_code)]

//! Turning placeholder names into symbol and file ids.
//!
//! Candidates are matched by exact qualified name first and by bare name
//! otherwise, filtered by what the relation kind can point at, then ranked by
//! locality (same file, then same directory, then anywhere). A placeholder is
//! only resolved when the best tier holds exactly one candidate; anything
//! else stays pending rather than guessing.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::types::{FileId, RelationKind, ResolveResult, Symbol, SymbolId, SymbolKind};

/// Last segment of a `::` or `.` qualified name.
pub fn unqualified(name: &str) -> &str {
    if let Some((_, tail)) = name.rsplit_once("::") {
        return tail;
    }
    name.rsplit_once('.').map_or(name, |(_, tail)| tail)
}

pub fn resolve_symbol_target(
    conn: &Connection,
    source: &Symbol,
    kind: RelationKind,
    placeholder: &str,
) -> Result<Option<SymbolId>> {
    let placeholder = placeholder.trim();
    if placeholder.is_empty() {
        return Ok(None);
    }

    let exact = filter_by_relation_kind(db::find_symbols_by_qualified_name(conn, placeholder)?, kind);
    let candidates = if exact.is_empty() {
        let bare = unqualified(placeholder);
        let by_name = filter_by_relation_kind(db::find_symbols_by_name(conn, bare, None)?, kind);
        narrow_by_qualifier(by_name, placeholder)
    } else {
        exact
    };

    let ranked = rank_candidates(candidates, &source.file_path);
    match ranked.as_slice() {
        [target] => Ok(Some(target.id)),
        _ => Ok(None),
    }
}

/// `<gpio.h>`, `"lcd.h"` and `hal\gpio.h` become plain forward-slash paths.
pub fn clean_include_target(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '<' | '>' | '"' | '\''))
        .replace('\\', "/")
}

pub fn resolve_file_target(
    conn: &Connection,
    source_path: &str,
    placeholder: &str,
) -> Result<Option<FileId>> {
    let cleaned = clean_include_target(placeholder);
    if cleaned.is_empty() {
        return Ok(None);
    }

    if let Some(file) = db::get_file_by_path(conn, &crate::utils::normalize_path(&cleaned))? {
        return Ok(Some(file.id));
    }

    let source_dir = Path::new(source_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some(joined) = join_relative(&source_dir, &cleaned) {
        if let Some(file) = db::get_file_by_path(conn, &joined)? {
            return Ok(Some(file.id));
        }
    }

    let suffix = cleaned.trim_start_matches("./").trim_start_matches("../");
    let matches = db::find_files_by_suffix(conn, suffix)?;
    match matches.as_slice() {
        [only] => Ok(Some(only.id)),
        _ => Ok(None),
    }
}

/// Re-attempts every pending edge that could name one of `file_id`'s symbols
/// or the file itself. Returns how many edges were resolved.
pub fn resolve_deferred_for_file(conn: &Connection, file_id: FileId) -> Result<usize> {
    let mut resolved = 0usize;

    let mut names: Vec<String> = db::symbols_for_file(conn, file_id)?
        .into_iter()
        .flat_map(|symbol| [symbol.name, symbol.qualified_name])
        .collect();
    names.sort_unstable();
    names.dedup();

    for relation in db::pending_relations_naming(conn, &names)? {
        let Some(placeholder) = relation.target.placeholder() else {
            continue;
        };
        let Some(source) = db::get_symbol(conn, relation.source_symbol_id)? else {
            continue;
        };
        if let Some(target) = resolve_symbol_target(conn, &source, relation.kind, placeholder)? {
            db::resolve_relation(conn, relation.id, target)?;
            resolved += 1;
        }
    }

    if let Some(file) = db::get_file_by_id(conn, file_id)? {
        for relation in db::pending_file_relations_matching(conn, &file.path)? {
            let Some(placeholder) = relation.target.placeholder() else {
                continue;
            };
            let Some(source) = db::get_file_by_id(conn, relation.source_file_id)? else {
                continue;
            };
            if let Some(target) = resolve_file_target(conn, &source.path, placeholder)? {
                db::resolve_file_relation(conn, relation.id, target)?;
                resolved += 1;
            }
        }
    }

    tracing::debug!(file_id, resolved, "deferred resolution pass");
    Ok(resolved)
}

/// Re-resolves every pending edge in the graph.
pub fn reconcile_all(conn: &Connection) -> Result<ResolveResult> {
    let pending = db::pending_relations(conn)?;
    let pending_files = db::pending_file_relations(conn)?;
    let scanned = pending.len() + pending_files.len();
    let mut resolved = 0usize;

    for relation in &pending {
        let Some(placeholder) = relation.target.placeholder() else {
            continue;
        };
        let Some(source) = db::get_symbol(conn, relation.source_symbol_id)? else {
            continue;
        };
        if let Some(target) = resolve_symbol_target(conn, &source, relation.kind, placeholder)? {
            db::resolve_relation(conn, relation.id, target)?;
            resolved += 1;
        }
    }

    for relation in &pending_files {
        let Some(placeholder) = relation.target.placeholder() else {
            continue;
        };
        let Some(source) = db::get_file_by_id(conn, relation.source_file_id)? else {
            continue;
        };
        if let Some(target) = resolve_file_target(conn, &source.path, placeholder)? {
            db::resolve_file_relation(conn, relation.id, target)?;
            resolved += 1;
        }
    }

    tracing::debug!(scanned, resolved, "reconciled pending relations");
    Ok(ResolveResult {
        scanned,
        resolved,
        remaining: scanned.saturating_sub(resolved),
    })
}

fn accepts_target(kind: RelationKind, target: SymbolKind) -> bool {
    match kind {
        RelationKind::Calls | RelationKind::Overrides => target.is_callable(),
        RelationKind::UsesType
        | RelationKind::ReturnsType
        | RelationKind::HasParamType
        | RelationKind::Inherits
        | RelationKind::Implements
        | RelationKind::Instantiates => target.is_type(),
        RelationKind::UsesMacro => target == SymbolKind::Macro,
        RelationKind::UsesVariable => target.is_value(),
        RelationKind::References | RelationKind::Includes | RelationKind::Imports => true,
    }
}

fn filter_by_relation_kind(symbols: Vec<Symbol>, kind: RelationKind) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols
        .into_iter()
        .filter(|s| accepts_target(kind, s.kind) && seen.insert(s.id))
        .collect()
}

/// For `lcd::init`, prefer `drivers::lcd::init` over an unrelated `init`.
pub(crate) fn narrow_by_qualifier(candidates: Vec<Symbol>, placeholder: &str) -> Vec<Symbol> {
    if unqualified(placeholder) == placeholder {
        return candidates;
    }
    let colon = format!("::{placeholder}");
    let dot = format!(".{placeholder}");
    let (matching, rest): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|s| s.qualified_name.ends_with(&colon) || s.qualified_name.ends_with(&dot));
    if matching.is_empty() { rest } else { matching }
}

fn rank_candidates(candidates: Vec<Symbol>, from_path: &str) -> Vec<Symbol> {
    let from_dir = Path::new(from_path).parent();
    let mut same_file = Vec::new();
    let mut same_dir = Vec::new();
    let mut others = Vec::new();

    for symbol in candidates {
        if symbol.file_path == from_path {
            same_file.push(symbol);
        } else if from_dir.is_some() && Path::new(&symbol.file_path).parent() == from_dir {
            same_dir.push(symbol);
        } else {
            others.push(symbol);
        }
    }

    if !same_file.is_empty() {
        same_file
    } else if !same_dir.is_empty() {
        same_dir
    } else {
        others
    }
}

/// Resolves `target` against `base_dir`, folding `.` and `..` segments.
/// Returns `None` when `..` climbs above the project root.
fn join_relative(base_dir: &str, target: &str) -> Option<String> {
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
