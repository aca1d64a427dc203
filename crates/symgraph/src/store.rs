#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;

use crate::db;
use crate::error::{GraphError, Result};
use crate::resolution;
use crate::types::{
    FileId, FileRecord, FileRelation, FileUpsert, GraphStats, NewRelation, RelationInsertReport,
    RelationTarget, ResolveResult, Symbol, SymbolDiff, SymbolId, SymbolInput, SymbolKind,
    SymbolRelation,
};
use crate::utils::{definition_hash, normalize_path, now_millis};

/// Persisted graph of files, symbols and relations.
///
/// All mutation goes through the single writer connection, one transaction
/// per call. Reads open their own read-only connection so they observe a
/// committed snapshot and never block on the writer.
#[derive(Debug)]
pub struct GraphStore {
    db_path: PathBuf,
    writer: Mutex<Connection>,
}

impl GraphStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let writer = db::open_write_connection(db_path)?;
        tracing::debug!(path = %db_path.display(), "opened graph store");
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    pub fn open_project(project_root: &Path) -> Result<Self> {
        Self::open(&db::database_path(project_root))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn reader(&self) -> Result<Connection> {
        db::open_read_connection(&self.db_path)
    }

    /// Runs `f` inside a read transaction on a fresh connection.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.reader()?;
        let tx = conn.unchecked_transaction()?;
        f(&tx)
    }

    /// Runs `f` inside one write transaction. Any error rolls back everything
    /// `f` did.
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| GraphError::Conflict("writer connection lock poisoned".to_string()))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn upsert_file(&self, file: &FileUpsert) -> Result<FileId> {
        self.write(|conn| upsert_file_in(conn, file))
    }

    pub fn replace_symbols(&self, file_id: FileId, symbols: &[SymbolInput]) -> Result<SymbolDiff> {
        self.write(|conn| replace_symbols_in(conn, file_id, symbols))
    }

    pub fn insert_relations(
        &self,
        file_id: FileId,
        relations: &[NewRelation],
    ) -> Result<RelationInsertReport> {
        self.write(|conn| insert_relations_in(conn, file_id, relations))
    }

    pub fn resolve_deferred_references(&self, file_id: FileId) -> Result<usize> {
        self.write(|conn| resolution::resolve_deferred_for_file(conn, file_id))
    }

    /// Hard-deletes a file. Edges from other files into it become pending.
    pub fn remove_file(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        self.write(|conn| remove_file_in(conn, &path))
    }

    pub fn mark_stale(&self, paths: &[String]) -> Result<usize> {
        self.write(|conn| {
            let mut marked = 0;
            for path in paths {
                if db::set_file_stale(conn, &normalize_path(path), true)? {
                    marked += 1;
                }
            }
            Ok(marked)
        })
    }

    /// Removes every stale file; returns the pruned paths.
    pub fn prune_stale(&self) -> Result<Vec<String>> {
        self.write(|conn| {
            let stale = db::stale_files(conn)?;
            let mut pruned = Vec::with_capacity(stale.len());
            for file in stale {
                remove_file_in(conn, &file.path)?;
                pruned.push(file.path);
            }
            Ok(pruned)
        })
    }

    pub fn reconcile_all(&self) -> Result<ResolveResult> {
        self.write(resolution::reconcile_all)
    }

    pub fn clear(&self) -> Result<()> {
        self.write(db::clear_database)
    }

    pub fn get_symbol(&self, symbol_id: SymbolId) -> Result<Symbol> {
        self.read(|conn| db::get_symbol(conn, symbol_id))?
            .ok_or_else(|| GraphError::not_found("symbol", symbol_id.to_string()))
    }

    pub fn get_file(&self, path: &str) -> Result<FileRecord> {
        self.find_file(path)?
            .ok_or_else(|| GraphError::not_found("file", path))
    }

    pub fn find_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let path = normalize_path(path);
        self.read(|conn| db::get_file_by_path(conn, &path))
    }

    pub fn find_symbols_by_name(&self, name: &str, kind: Option<SymbolKind>) -> Result<Vec<Symbol>> {
        self.read(|conn| db::find_symbols_by_name(conn, name, kind))
    }

    pub fn stats(&self) -> Result<GraphStats> {
        self.read(db::stats)
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.read(db::list_files)
    }

    pub fn files_under(&self, prefix: &str) -> Result<Vec<FileRecord>> {
        let prefix = normalize_path(prefix);
        self.read(|conn| db::files_under(conn, &prefix))
    }

    pub fn symbols_in_file(&self, file_id: FileId) -> Result<Vec<Symbol>> {
        self.read(|conn| db::symbols_for_file(conn, file_id))
    }

    pub fn outgoing_relations(&self, symbol_id: SymbolId) -> Result<Vec<SymbolRelation>> {
        self.read(|conn| db::relations_from(conn, symbol_id))
    }

    pub fn incoming_relations(&self, symbol_id: SymbolId) -> Result<Vec<SymbolRelation>> {
        self.read(|conn| db::relations_to(conn, symbol_id))
    }

    pub fn file_relations_from(&self, file_id: FileId) -> Result<Vec<FileRelation>> {
        self.read(|conn| db::file_relations_from(conn, file_id))
    }
}

// ---------------------------------------------------------------------------
// Transaction bodies, shared with the indexer so a whole file lands in one
// transaction.
// ---------------------------------------------------------------------------

pub(crate) fn upsert_file_in(conn: &Connection, file: &FileUpsert) -> Result<FileId> {
    let mut normalized = file.clone();
    normalized.path = normalize_path(&file.path);
    if normalized.path.is_empty() {
        return Err(GraphError::Conflict("file path must not be empty".to_string()));
    }
    db::upsert_file(conn, &normalized, now_millis())
}

type SymbolKey = (String, SymbolKind, i64, i64);

fn symbol_key(name: &str, kind: SymbolKind, line_start: i64, line_end: i64) -> SymbolKey {
    (name.to_string(), kind, line_start, line_end)
}

pub(crate) fn replace_symbols_in(
    conn: &Connection,
    file_id: FileId,
    symbols: &[SymbolInput],
) -> Result<SymbolDiff> {
    if db::get_file_by_id(conn, file_id)?.is_none() {
        return Err(GraphError::not_found("file", file_id.to_string()));
    }

    let mut existing: HashMap<SymbolKey, Symbol> = db::symbols_for_file(conn, file_id)?
        .into_iter()
        .map(|s| (symbol_key(&s.name, s.kind, s.line_start, s.line_end), s))
        .collect();

    let mut diff = SymbolDiff::default();
    let mut to_update = Vec::new();
    let mut to_insert = Vec::new();

    for symbol in symbols {
        let key = symbol_key(&symbol.name, symbol.kind, symbol.line_start, symbol.line_end);
        let hash = definition_hash(&symbol.qualified_name, symbol.kind, symbol.signature.as_deref());
        match existing.remove(&key) {
            Some(current) if current.definition_hash != hash => to_update.push((current.id, symbol, hash)),
            Some(_) => {}
            None => to_insert.push((symbol, hash)),
        }
    }

    // Whatever is left in `existing` vanished from the file. Delete first so
    // a symbol that only moved its end line does not trip the unique key.
    let mut removed: Vec<Symbol> = existing.into_values().collect();
    removed.sort_by_key(|s| s.id);
    for symbol in &removed {
        db::demote_incoming_relations(conn, symbol.id, &symbol.qualified_name)?;
        db::delete_symbol(conn, symbol.id)?;
        diff.removed += 1;
    }

    for (id, symbol, hash) in to_update {
        db::update_symbol(conn, id, symbol, &hash)?;
        diff.updated += 1;
    }

    for (symbol, hash) in to_insert {
        db::insert_symbol(conn, file_id, symbol, &hash)?;
        diff.added += 1;
    }

    Ok(diff)
}

pub(crate) fn clear_outgoing_relations_in(conn: &Connection, file_id: FileId) -> Result<usize> {
    let symbol_edges = db::delete_outgoing_relations_for_file(conn, file_id)?;
    let file_edges = db::delete_file_relations_from(conn, file_id)?;
    Ok(symbol_edges + file_edges)
}

pub(crate) fn insert_relations_in(
    conn: &Connection,
    file_id: FileId,
    relations: &[NewRelation],
) -> Result<RelationInsertReport> {
    let file = db::get_file_by_id(conn, file_id)?
        .ok_or_else(|| GraphError::not_found("file", file_id.to_string()))?;
    let mut report = RelationInsertReport::default();
    let mut sources: HashMap<SymbolId, Symbol> = HashMap::new();

    for relation in relations {
        let target_name = relation.target.trim();
        if target_name.is_empty() {
            return Err(GraphError::Conflict(format!(
                "{:?} relation in {} has an empty target",
                relation.kind, file.path
            )));
        }

        let target = if relation.kind.is_file_level() {
            let include = resolution::clean_include_target(target_name);
            if include.is_empty() {
                return Err(GraphError::Conflict(format!(
                    "{:?} relation in {} has an empty target `{target_name}`",
                    relation.kind, file.path
                )));
            }
            let target = match resolution::resolve_file_target(conn, &file.path, &include)? {
                Some(id) => RelationTarget::Resolved(id),
                None => RelationTarget::Pending(include),
            };
            db::insert_file_relation(conn, relation.kind, file_id, &target, relation.line)?;
            target
        } else {
            let source_id = relation.source_symbol_id.ok_or_else(|| {
                GraphError::Conflict(format!(
                    "{:?} relation to `{target_name}` in {} has no source symbol",
                    relation.kind, file.path
                ))
            })?;
            if !sources.contains_key(&source_id) {
                let source = db::get_symbol(conn, source_id)?
                    .filter(|s| s.file_id == file_id)
                    .ok_or_else(|| {
                        GraphError::Conflict(format!(
                            "source symbol {source_id} does not belong to {}",
                            file.path
                        ))
                    })?;
                sources.insert(source_id, source);
            }
            let Some(source) = sources.get(&source_id) else {
                continue;
            };
            let target =
                match resolution::resolve_symbol_target(conn, source, relation.kind, target_name)? {
                    Some(id) => RelationTarget::Resolved(id),
                    None => RelationTarget::Pending(target_name.to_string()),
                };
            db::insert_relation(conn, relation.kind, source_id, &target, relation.line)?;
            target
        };

        report.inserted += 1;
        if target.is_pending() {
            report.pending += 1;
        } else {
            report.resolved += 1;
        }
    }

    Ok(report)
}

pub(crate) fn remove_file_in(conn: &Connection, path: &str) -> Result<bool> {
    let Some(file) = db::get_file_by_path(conn, path)? else {
        return Ok(false);
    };

    for symbol in db::symbols_for_file(conn, file.id)? {
        db::demote_incoming_relations(conn, symbol.id, &symbol.qualified_name)?;
    }
    db::demote_incoming_file_relations(conn, file.id, &file.path)?;
    db::delete_file(conn, file.id)?;
    tracing::info!(path = %file.path, "removed file from graph");
    Ok(true)
}
