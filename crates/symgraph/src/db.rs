#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};

use crate::config;
use crate::error::Result;
use crate::resolution;
use crate::types::{
    FileEntity, FileId, FileRecord, FileRelation, FileUpsert, GraphStats, RelationKind,
    RelationTarget, Symbol, SymbolEntity, SymbolId, SymbolInput, SymbolKind, SymbolRelation,
    TraversalDirection,
};

pub const DATABASE_FILENAME: &str = "graph.db";
pub const SCHEMA_VERSION: i64 = 2;
pub const SCHEMA_SQL: &str = include_str!("db/schema.sql");

/// Indexes on columns added after version 1; created once the columns exist.
const TAIL_INDEXES: &str =
    "CREATE INDEX IF NOT EXISTS idx_relations_tail ON relations(target_tail);
     CREATE INDEX IF NOT EXISTS idx_file_relations_tail ON file_relations(target_tail);";

const PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Stays well under SQLite's host parameter limit.
const IN_CHUNK: usize = 500;

const FILE_COLUMNS: &str = "id, path, content_hash, language, lines_total, symbol_count, \
                            last_indexed_at, is_critical, is_stale";

const SYMBOL_SELECT: &str = "SELECT s.id, s.file_id, f.path, s.name, s.qualified_name, s.kind, \
                             s.signature, s.line_start, s.line_end, s.definition_hash \
                             FROM symbols s JOIN files f ON f.id = s.file_id";

const RELATION_COLUMNS: &str =
    "id, kind, source_symbol_id, target_symbol_id, target_placeholder, line";

const FILE_RELATION_COLUMNS: &str =
    "id, kind, source_file_id, target_file_id, target_placeholder, line";

pub fn database_path(project_root: &Path) -> PathBuf {
    config::data_dir(project_root).join(DATABASE_FILENAME)
}

/// Opens (creating if needed) the writer connection and applies the schema.
pub fn open_write_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(PRAGMAS)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

pub fn open_read_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    let existing = schema_version(conn)?.unwrap_or(SCHEMA_VERSION);

    if existing < 2 {
        for table in ["relations", "file_relations"] {
            if !has_column(conn, table, "target_tail")? {
                conn.execute(&format!("ALTER TABLE {table} ADD COLUMN target_tail TEXT"), [])?;
            }
        }
        backfill_placeholder_tails(conn)?;
    }
    conn.execute_batch(TAIL_INDEXES)?;

    conn.execute(
        "INSERT INTO graph_meta (key, value) VALUES ('schema_version', ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for row in rows {
        if row? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Version 1 stored include targets verbatim and had no tail column.
fn backfill_placeholder_tails(conn: &Connection) -> Result<()> {
    let pending: Vec<(i64, String)> = {
        let mut stmt =
            conn.prepare("SELECT id, target_placeholder FROM relations WHERE target_placeholder IS NOT NULL")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for (id, placeholder) in pending {
        conn.execute(
            "UPDATE relations SET target_tail = ?2 WHERE id = ?1",
            params![id, symbol_tail(&placeholder)],
        )?;
    }

    let pending_files: Vec<(i64, String)> = {
        let mut stmt = conn
            .prepare("SELECT id, target_placeholder FROM file_relations WHERE target_placeholder IS NOT NULL")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for (id, placeholder) in pending_files {
        let cleaned = resolution::clean_include_target(&placeholder);
        conn.execute(
            "UPDATE file_relations SET target_placeholder = ?2, target_tail = ?3 WHERE id = ?1",
            params![id, cleaned, file_tail(&cleaned)],
        )?;
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<Option<i64>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM graph_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|v| v.parse().ok()))
}

pub fn clear_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM file_relations;
         DELETE FROM relations;
         DELETE FROM symbols;
         DELETE FROM files;",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

pub fn get_file_by_path(conn: &Connection, path: &str) -> Result<Option<FileRecord>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?");
    Ok(conn.query_row(&sql, params![path], row_to_file).optional()?)
}

pub fn get_file_by_id(conn: &Connection, file_id: FileId) -> Result<Option<FileRecord>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
    Ok(conn.query_row(&sql, params![file_id], row_to_file).optional()?)
}

pub fn list_files(conn: &Connection) -> Result<Vec<FileRecord>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_file)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Files whose path equals `prefix` or lies beneath it as a directory.
pub fn files_under(conn: &Connection, prefix: &str) -> Result<Vec<FileRecord>> {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return list_files(conn);
    }
    let dir = format!("{trimmed}/");
    let sql = format!(
        "SELECT {FILE_COLUMNS} FROM files
         WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
         ORDER BY path"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![trimmed, dir], row_to_file)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Files whose path ends with `/suffix`, ascending by path.
pub fn find_files_by_suffix(conn: &Connection, suffix: &str) -> Result<Vec<FileRecord>> {
    let needle = format!("/{}", suffix.trim_start_matches('/'));
    let sql = format!(
        "SELECT {FILE_COLUMNS} FROM files
         WHERE length(path) >= length(?1) AND substr(path, -length(?1)) = ?1
         ORDER BY path"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![needle], row_to_file)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn stale_files(conn: &Connection) -> Result<Vec<FileRecord>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE is_stale = 1 ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_file)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Inserts or refreshes a file row keyed by path and clears its stale flag.
pub fn upsert_file(conn: &Connection, file: &FileUpsert, indexed_at: i64) -> Result<FileId> {
    let id = conn.query_row(
        "INSERT INTO files (path, content_hash, language, lines_total, is_critical, is_stale, last_indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
         ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            language = excluded.language,
            lines_total = excluded.lines_total,
            is_critical = excluded.is_critical,
            is_stale = 0,
            last_indexed_at = excluded.last_indexed_at
         RETURNING id",
        params![
            file.path,
            file.content_hash,
            file.language,
            file.lines_total,
            i32::from(file.is_critical),
            indexed_at,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn update_file_metrics(
    conn: &Connection,
    file_id: FileId,
    lines_total: i64,
    symbol_count: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE files SET lines_total = ?2, symbol_count = ?3 WHERE id = ?1",
        params![file_id, lines_total, symbol_count],
    )?;
    Ok(())
}

pub fn set_file_stale(conn: &Connection, path: &str, stale: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE files SET is_stale = ?2 WHERE path = ?1",
        params![path, i32::from(stale)],
    )?;
    Ok(changed > 0)
}

pub fn delete_file(conn: &Connection, file_id: FileId) -> Result<()> {
    conn.execute("DELETE FROM files WHERE id = ?", params![file_id])?;
    Ok(())
}

pub fn file_entities(conn: &Connection, ids: &[FileId]) -> Result<Vec<FileEntity>> {
    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT id, path, language, is_critical, is_stale FROM files WHERE id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok(FileEntity {
                id: row.get(0)?,
                path: row.get(1)?,
                language: row.get(2)?,
                is_critical: row.get::<_, i64>(3)? != 0,
                is_stale: row.get::<_, i64>(4)? != 0,
            })
        })?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

pub fn get_symbol(conn: &Connection, symbol_id: SymbolId) -> Result<Option<Symbol>> {
    let sql = format!("{SYMBOL_SELECT} WHERE s.id = ?");
    Ok(conn.query_row(&sql, params![symbol_id], row_to_symbol).optional()?)
}

pub fn symbols_for_file(conn: &Connection, file_id: FileId) -> Result<Vec<Symbol>> {
    let sql = format!("{SYMBOL_SELECT} WHERE s.file_id = ? ORDER BY s.line_start, s.id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![file_id], row_to_symbol)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_symbols_by_name(
    conn: &Connection,
    name: &str,
    kind: Option<SymbolKind>,
) -> Result<Vec<Symbol>> {
    let rows = match kind {
        Some(kind) => {
            let sql = format!(
                "{SYMBOL_SELECT} WHERE s.name = ?1 AND s.kind = ?2 ORDER BY f.path, s.line_start, s.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![name, symbol_kind_to_string(kind)], row_to_symbol)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let sql =
                format!("{SYMBOL_SELECT} WHERE s.name = ?1 ORDER BY f.path, s.line_start, s.id");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![name], row_to_symbol)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(rows)
}

pub fn find_symbols_by_qualified_name(conn: &Connection, qualified: &str) -> Result<Vec<Symbol>> {
    let sql = format!(
        "{SYMBOL_SELECT} WHERE s.qualified_name = ? ORDER BY f.path, s.line_start, s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![qualified], row_to_symbol)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn symbols_in_critical_files(conn: &Connection) -> Result<Vec<Symbol>> {
    let sql = format!(
        "{SYMBOL_SELECT} WHERE f.is_critical = 1 ORDER BY f.path, s.line_start, s.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_symbol)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn symbol_entities(conn: &Connection, ids: &[SymbolId]) -> Result<Vec<SymbolEntity>> {
    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT s.id, s.name, s.qualified_name, s.kind, f.path, s.line_start, f.is_critical
             FROM symbols s JOIN files f ON f.id = s.file_id
             WHERE s.id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            let kind_raw: String = row.get(3)?;
            Ok(SymbolEntity {
                id: row.get(0)?,
                name: row.get(1)?,
                qualified_name: row.get(2)?,
                kind: parse_symbol_kind(&kind_raw).unwrap_or(SymbolKind::Variable),
                file_path: row.get(4)?,
                line_start: row.get(5)?,
                is_critical: row.get::<_, i64>(6)? != 0,
            })
        })?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

/// Owning file of each symbol id; ids that no longer exist are omitted.
pub fn symbol_files(conn: &Connection, ids: &[SymbolId]) -> Result<Vec<(SymbolId, FileId)>> {
    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(IN_CHUNK) {
        let sql = format!(
            "SELECT id, file_id FROM symbols WHERE id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

pub fn insert_symbol(
    conn: &Connection,
    file_id: FileId,
    symbol: &SymbolInput,
    definition_hash: &str,
) -> Result<SymbolId> {
    conn.execute(
        "INSERT INTO symbols (file_id, name, qualified_name, kind, signature, line_start, line_end, definition_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            file_id,
            symbol.name,
            symbol.qualified_name,
            symbol_kind_to_string(symbol.kind),
            symbol.signature,
            symbol.line_start,
            symbol.line_end,
            definition_hash,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_symbol(
    conn: &Connection,
    symbol_id: SymbolId,
    symbol: &SymbolInput,
    definition_hash: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE symbols
         SET qualified_name = ?2, signature = ?3, definition_hash = ?4
         WHERE id = ?1",
        params![
            symbol_id,
            symbol.qualified_name,
            symbol.signature,
            definition_hash,
        ],
    )?;
    Ok(())
}

pub fn delete_symbol(conn: &Connection, symbol_id: SymbolId) -> Result<()> {
    conn.execute("DELETE FROM symbols WHERE id = ?", params![symbol_id])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// Turns every resolved edge pointing at `symbol_id` back into a placeholder.
pub fn demote_incoming_relations(
    conn: &Connection,
    symbol_id: SymbolId,
    placeholder: &str,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE relations SET target_symbol_id = NULL, target_placeholder = ?2, target_tail = ?3
         WHERE target_symbol_id = ?1",
        params![symbol_id, placeholder, symbol_tail(placeholder)],
    )?)
}

pub fn demote_incoming_file_relations(
    conn: &Connection,
    file_id: FileId,
    placeholder: &str,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE file_relations SET target_file_id = NULL, target_placeholder = ?2, target_tail = ?3
         WHERE target_file_id = ?1",
        params![file_id, placeholder, file_tail(placeholder)],
    )?)
}

pub fn delete_outgoing_relations_for_file(conn: &Connection, file_id: FileId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM relations
         WHERE source_symbol_id IN (SELECT id FROM symbols WHERE file_id = ?)",
        params![file_id],
    )?)
}

pub fn delete_file_relations_from(conn: &Connection, file_id: FileId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM file_relations WHERE source_file_id = ?",
        params![file_id],
    )?)
}

pub fn insert_relation(
    conn: &Connection,
    kind: RelationKind,
    source_symbol_id: SymbolId,
    target: &RelationTarget,
    line: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO relations
            (kind, source_symbol_id, target_symbol_id, target_placeholder, target_tail, line)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            relation_kind_to_string(kind),
            source_symbol_id,
            target.resolved_id(),
            target.placeholder(),
            target.placeholder().map(symbol_tail),
            line,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_file_relation(
    conn: &Connection,
    kind: RelationKind,
    source_file_id: FileId,
    target: &RelationTarget,
    line: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO file_relations
            (kind, source_file_id, target_file_id, target_placeholder, target_tail, line)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            relation_kind_to_string(kind),
            source_file_id,
            target.resolved_id(),
            target.placeholder(),
            target.placeholder().map(file_tail),
            line,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Flips a pending edge to resolved in place; id and line are preserved.
pub fn resolve_relation(conn: &Connection, relation_id: i64, target: SymbolId) -> Result<()> {
    conn.execute(
        "UPDATE relations SET target_symbol_id = ?2, target_placeholder = NULL, target_tail = NULL
         WHERE id = ?1",
        params![relation_id, target],
    )?;
    Ok(())
}

pub fn resolve_file_relation(conn: &Connection, relation_id: i64, target: FileId) -> Result<()> {
    conn.execute(
        "UPDATE file_relations SET target_file_id = ?2, target_placeholder = NULL, target_tail = NULL
         WHERE id = ?1",
        params![relation_id, target],
    )?;
    Ok(())
}

pub fn get_relation(conn: &Connection, relation_id: i64) -> Result<Option<SymbolRelation>> {
    let sql = format!("SELECT {RELATION_COLUMNS} FROM relations WHERE id = ?");
    Ok(conn
        .query_row(&sql, params![relation_id], row_to_relation)
        .optional()?)
}

/// Pending symbol edges whose placeholder equals one of `keys` or ends in
/// one of them after its last `::` or `.` separator. Ordered by id.
pub fn pending_relations_naming(conn: &Connection, keys: &[String]) -> Result<Vec<SymbolRelation>> {
    let mut found = BTreeMap::new();
    for chunk in keys.chunks(IN_CHUNK) {
        let marks = placeholders(chunk.len());
        let sql = format!(
            "SELECT {RELATION_COLUMNS} FROM relations
             WHERE target_tail IN ({marks}) OR target_placeholder IN ({marks})"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter().chain(chunk.iter())), row_to_relation)?;
        for row in rows {
            let relation = row?;
            found.insert(relation.id, relation);
        }
    }
    Ok(found.into_values().collect())
}

/// Pending file edges whose placeholder could name `path`: the last path
/// segments have to agree.
pub fn pending_file_relations_matching(conn: &Connection, path: &str) -> Result<Vec<FileRelation>> {
    let sql = format!(
        "SELECT {FILE_RELATION_COLUMNS} FROM file_relations
         WHERE target_tail = ?1
         ORDER BY id"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![file_tail(path)], row_to_file_relation)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn pending_relations(conn: &Connection) -> Result<Vec<SymbolRelation>> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM relations WHERE target_placeholder IS NOT NULL ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_relation)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn pending_file_relations(conn: &Connection) -> Result<Vec<FileRelation>> {
    let sql = format!(
        "SELECT {FILE_RELATION_COLUMNS} FROM file_relations
         WHERE target_placeholder IS NOT NULL ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_file_relation)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn relations_from(conn: &Connection, symbol_id: SymbolId) -> Result<Vec<SymbolRelation>> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM relations WHERE source_symbol_id = ? ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![symbol_id], row_to_relation)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn relations_to(conn: &Connection, symbol_id: SymbolId) -> Result<Vec<SymbolRelation>> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM relations WHERE target_symbol_id = ? ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![symbol_id], row_to_relation)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn file_relations_from(conn: &Connection, file_id: FileId) -> Result<Vec<FileRelation>> {
    let sql = format!(
        "SELECT {FILE_RELATION_COLUMNS} FROM file_relations WHERE source_file_id = ? ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![file_id], row_to_file_relation)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Resolved neighbours of a symbol over the given relation kinds, ascending by id.
pub fn symbol_neighbors(
    conn: &Connection,
    symbol_id: SymbolId,
    kinds: &[RelationKind],
    direction: TraversalDirection,
) -> Result<Vec<SymbolId>> {
    let (select, filter) = match direction {
        TraversalDirection::Outgoing => ("target_symbol_id", "source_symbol_id"),
        TraversalDirection::Incoming => ("source_symbol_id", "target_symbol_id"),
    };
    neighbors(conn, "relations", select, filter, symbol_id, kinds)
}

pub fn file_neighbors(
    conn: &Connection,
    file_id: FileId,
    kinds: &[RelationKind],
    direction: TraversalDirection,
) -> Result<Vec<FileId>> {
    let (select, filter) = match direction {
        TraversalDirection::Outgoing => ("target_file_id", "source_file_id"),
        TraversalDirection::Incoming => ("source_file_id", "target_file_id"),
    };
    neighbors(conn, "file_relations", select, filter, file_id, kinds)
}

fn neighbors(
    conn: &Connection,
    table: &str,
    select: &str,
    filter: &str,
    id: i64,
    kinds: &[RelationKind],
) -> Result<Vec<i64>> {
    if kinds.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT DISTINCT {select} FROM {table}
         WHERE {filter} = ? AND {select} IS NOT NULL AND kind IN ({})
         ORDER BY {select}",
        placeholders(kinds.len())
    );
    let mut values = Vec::with_capacity(kinds.len() + 1);
    values.push(Value::Integer(id));
    values.extend(kinds.iter().map(|k| Value::Text(relation_kind_to_string(*k))));

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn stats(conn: &Connection) -> Result<GraphStats> {
    Ok(conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM files),
            (SELECT COUNT(*) FROM files WHERE is_stale = 1),
            (SELECT COUNT(*) FROM files WHERE is_critical = 1),
            (SELECT COUNT(*) FROM symbols),
            (SELECT COUNT(*) FROM relations),
            (SELECT COUNT(*) FROM relations WHERE target_placeholder IS NOT NULL),
            (SELECT COUNT(*) FROM file_relations),
            (SELECT COUNT(*) FROM file_relations WHERE target_placeholder IS NOT NULL)",
        [],
        |row| {
            Ok(GraphStats {
                files: row.get(0)?,
                stale_files: row.get(1)?,
                critical_files: row.get(2)?,
                symbols: row.get(3)?,
                relations: row.get(4)?,
                pending_relations: row.get(5)?,
                file_relations: row.get(6)?,
                pending_file_relations: row.get(7)?,
            })
        },
    )?)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) fn symbol_kind_to_string(kind: SymbolKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(std::string::ToString::to_string))
        .unwrap_or_else(|| "variable".to_string())
}

pub(crate) fn relation_kind_to_string(kind: RelationKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(std::string::ToString::to_string))
        .unwrap_or_else(|| "references".to_string())
}

/// Accepts the snake_case names plus case and separator variants parsers
/// commonly emit (`Function`, `type-alias`).
pub(crate) fn parse_symbol_kind(raw: &str) -> Option<SymbolKind> {
    serde_json::from_str::<SymbolKind>(&format!("\"{}\"", normalize_kind(raw))).ok()
}

pub(crate) fn parse_relation_kind(raw: &str) -> Option<RelationKind> {
    serde_json::from_str::<RelationKind>(&format!("\"{}\"", normalize_kind(raw))).ok()
}

fn normalize_kind(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

fn symbol_tail(placeholder: &str) -> &str {
    resolution::unqualified(placeholder)
}

fn file_tail(placeholder: &str) -> &str {
    placeholder.rsplit('/').next().unwrap_or(placeholder)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        content_hash: row.get(2)?,
        language: row.get(3)?,
        lines_total: row.get(4)?,
        symbol_count: row.get(5)?,
        last_indexed_at: row.get(6)?,
        is_critical: row.get::<_, i64>(7)? != 0,
        is_stale: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<Symbol> {
    let kind_raw: String = row.get(5)?;
    Ok(Symbol {
        id: row.get(0)?,
        file_id: row.get(1)?,
        file_path: row.get(2)?,
        name: row.get(3)?,
        qualified_name: row.get(4)?,
        kind: parse_symbol_kind(&kind_raw).unwrap_or(SymbolKind::Variable),
        signature: row.get(6)?,
        line_start: row.get(7)?,
        line_end: row.get(8)?,
        definition_hash: row.get(9)?,
    })
}

fn row_to_target(id: Option<i64>, placeholder: Option<String>) -> RelationTarget {
    match id {
        Some(id) => RelationTarget::Resolved(id),
        None => RelationTarget::Pending(placeholder.unwrap_or_default()),
    }
}

fn row_to_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRelation> {
    let kind_raw: String = row.get(1)?;
    Ok(SymbolRelation {
        id: row.get(0)?,
        kind: parse_relation_kind(&kind_raw).unwrap_or(RelationKind::References),
        source_symbol_id: row.get(2)?,
        target: row_to_target(row.get(3)?, row.get(4)?),
        line: row.get(5)?,
    })
}

fn row_to_file_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRelation> {
    let kind_raw: String = row.get(1)?;
    Ok(FileRelation {
        id: row.get(0)?,
        kind: parse_relation_kind(&kind_raw).unwrap_or(RelationKind::Includes),
        source_file_id: row.get(2)?,
        target: row_to_target(row.get(3)?, row.get(4)?),
        line: row.get(5)?,
    })
}
