#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::{GraphConfig, IndexingConfig, PathMatcher};
use crate::db;
use crate::error::{GraphError, ParseInputError, Result};
use crate::resolution;
use crate::store::{self, GraphStore};
use crate::types::{
    FileUpsert, NewRelation, ParsedFile, ParsedRelation, ParsedSymbol, RelationKind,
    ResolveResult, Symbol, SymbolInput, SymbolKind,
};
use crate::utils::{default_qualified_name, hash_sha256, normalize_path};

/// External collaborator that turns source text into symbols and relations.
pub trait SourceParser: Sync {
    fn parse(&self, path: &str, content: &str) -> Result<ParsedFile>;
}

impl<F> SourceParser for F
where
    F: Fn(&str, &str) -> Result<ParsedFile> + Sync,
{
    fn parse(&self, path: &str, content: &str) -> Result<ParsedFile> {
        self(path, content)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Re-index even when the content hash is unchanged.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Scanning,
    Parsing,
    Storing,
    Resolving,
}

#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub phase: IndexPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexResult {
    pub path: String,
    pub symbols_added: usize,
    pub symbols_removed: usize,
    pub symbols_updated: usize,
    pub relations_added: usize,
    pub relations_pending: usize,
    pub deferred_resolved: usize,
    /// Content hash unchanged; nothing was written.
    pub skipped: bool,
    pub warnings: Vec<ParseInputError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<IndexResult>,
    pub failures: Vec<FileFailure>,
    pub stale_marked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<ResolveResult>,
    pub duration_ms: u128,
}

impl BatchReport {
    pub fn indexed(&self) -> usize {
        self.results.iter().filter(|r| !r.skipped).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.skipped).count()
    }
}

/// Applies parser output to the graph, one write transaction per file.
pub struct Indexer<'a> {
    store: &'a GraphStore,
    root: PathBuf,
    indexing: IndexingConfig,
    matcher: PathMatcher,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a GraphStore, config: &GraphConfig) -> Result<Self> {
        Ok(Self {
            store,
            root: PathBuf::from(&config.root_dir),
            indexing: config.indexing.clone(),
            matcher: PathMatcher::new(&config.indexing)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reconciles one parsed file into the graph.
    ///
    /// Unchanged files (same hash, not stale) are a no-op unless `force` is
    /// set. On error nothing is written and the file's previous state stays.
    pub fn index_file(&self, parsed: &ParsedFile, options: IndexOptions) -> Result<IndexResult> {
        let path = normalize_path(&parsed.path);
        if path.is_empty() {
            return Err(GraphError::ParseInput {
                path: parsed.path.clone(),
                message: "missing file path".to_string(),
            });
        }

        let supplied_hash = parsed
            .content_hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty());
        let on_disk = if supplied_hash.is_none() || parsed.lines_total.is_none() {
            fs::read(self.root.join(&path))
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };
        let content_hash = match supplied_hash {
            Some(hash) => hash.to_string(),
            None => match &on_disk {
                Some(content) => hash_sha256(content),
                None => hash_sha256(&serde_json::to_string(parsed)?),
            },
        };

        if let Some(existing) = self.store.find_file(&path)? {
            if existing.content_hash == content_hash && !existing.is_stale && !options.force {
                tracing::debug!(path = %path, "content unchanged, skipping");
                return Ok(IndexResult {
                    path,
                    skipped: true,
                    ..IndexResult::default()
                });
            }
        }

        let (symbols, relations, mut warnings) = validate(&path, parsed);
        let lines_total = parsed
            .lines_total
            .or_else(|| on_disk.as_ref().map(|c| i64::try_from(c.lines().count()).unwrap_or(i64::MAX)))
            .unwrap_or_else(|| symbols.iter().map(|s| s.line_end).max().unwrap_or(0));
        let language = if parsed.language.trim().is_empty() {
            detect_language(&path).to_string()
        } else {
            parsed.language.trim().to_ascii_lowercase()
        };
        let upsert = FileUpsert {
            path: path.clone(),
            content_hash,
            language,
            lines_total,
            is_critical: self.matcher.is_critical(&path),
        };

        let started = Instant::now();
        let mut result = self.store.write(|conn| {
            let file_id = store::upsert_file_in(conn, &upsert)?;
            let diff = store::replace_symbols_in(conn, file_id, &symbols)?;
            store::clear_outgoing_relations_in(conn, file_id)?;

            let stored = db::symbols_for_file(conn, file_id)?;
            let bound = bind_sources(&relations, &stored, &mut warnings);
            let report = store::insert_relations_in(conn, file_id, &bound)?;
            let deferred = resolution::resolve_deferred_for_file(conn, file_id)?;
            db::update_file_metrics(
                conn,
                file_id,
                lines_total,
                i64::try_from(stored.len()).unwrap_or(i64::MAX),
            )?;

            Ok(IndexResult {
                path: path.clone(),
                symbols_added: diff.added,
                symbols_removed: diff.removed,
                symbols_updated: diff.updated,
                relations_added: report.inserted,
                relations_pending: report.pending,
                deferred_resolved: deferred,
                skipped: false,
                warnings: Vec::new(),
            })
        })?;

        for warning in &warnings {
            tracing::warn!(path = %path, entry = %warning.entry, reason = %warning.reason, "skipped parser entry");
        }
        result.warnings = warnings;

        tracing::info!(
            path = %result.path,
            added = result.symbols_added,
            updated = result.symbols_updated,
            removed = result.symbols_removed,
            relations = result.relations_added,
            pending = result.relations_pending,
            deferred = result.deferred_resolved,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "indexed file"
        );
        Ok(result)
    }

    /// Indexes pre-parsed files in order. A failing file is reported and does
    /// not affect the others.
    pub fn index_batch(
        &self,
        files: &[ParsedFile],
        options: IndexOptions,
        on_progress: Option<&dyn Fn(IndexProgress)>,
    ) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::default();

        for (idx, parsed) in files.iter().enumerate() {
            if let Some(cb) = on_progress {
                cb(IndexProgress {
                    phase: IndexPhase::Storing,
                    current: idx + 1,
                    total: files.len(),
                    current_file: Some(parsed.path.clone()),
                });
            }
            self.record(&mut report, &parsed.path, self.index_file(parsed, options));
        }

        report.duration_ms = start.elapsed().as_millis();
        report
    }

    /// Scans the project root, parses matching files in parallel and applies
    /// them one transaction at a time. Tracked files missing from disk are
    /// marked stale, then every pending edge is re-resolved.
    pub fn index_directory<P: SourceParser>(
        &self,
        parser: &P,
        options: IndexOptions,
        on_progress: Option<&dyn Fn(IndexProgress)>,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let mut report = BatchReport::default();

        let files = scan_directory(&self.root, &self.matcher, |current, file| {
            if let Some(cb) = on_progress {
                cb(IndexProgress {
                    phase: IndexPhase::Scanning,
                    current,
                    total: 0,
                    current_file: Some(file.to_string()),
                });
            }
        });

        if let Some(cb) = on_progress {
            cb(IndexProgress {
                phase: IndexPhase::Parsing,
                current: 0,
                total: files.len(),
                current_file: None,
            });
        }
        let parse_one = |rel: &String| (rel.clone(), self.read_and_parse(parser, rel));
        let parsed: Vec<(String, Result<Option<ParsedFile>>)> = if self.indexing.parallel {
            files.par_iter().map(parse_one).collect()
        } else {
            files.iter().map(parse_one).collect()
        };

        let total = parsed.len();
        for (idx, (rel, outcome)) in parsed.into_iter().enumerate() {
            if let Some(cb) = on_progress {
                cb(IndexProgress {
                    phase: IndexPhase::Storing,
                    current: idx + 1,
                    total,
                    current_file: Some(rel.clone()),
                });
            }
            match outcome {
                Ok(Some(file)) => self.record(&mut report, &rel, self.index_file(&file, options)),
                Ok(None) => {}
                Err(err) => self.record(&mut report, &rel, Err(err)),
            }
        }

        let missing: Vec<String> = self
            .store
            .list_files()?
            .into_iter()
            .filter(|f| !f.is_stale && !self.root.join(&f.path).exists())
            .map(|f| f.path)
            .collect();
        if !missing.is_empty() {
            report.stale_marked = self.store.mark_stale(&missing)?;
            tracing::info!(count = report.stale_marked, "marked missing files stale");
        }

        if let Some(cb) = on_progress {
            cb(IndexProgress {
                phase: IndexPhase::Resolving,
                current: 0,
                total: 0,
                current_file: None,
            });
        }
        report.reconciled = Some(self.store.reconcile_all()?);
        report.duration_ms = start.elapsed().as_millis();
        Ok(report)
    }

    pub fn remove_file(&self, path: &str) -> Result<bool> {
        self.store.remove_file(path)
    }

    fn read_and_parse<P: SourceParser>(&self, parser: &P, rel: &str) -> Result<Option<ParsedFile>> {
        let full_path = self.root.join(rel);
        let metadata = fs::metadata(&full_path)?;
        if metadata.len() > self.indexing.max_file_size {
            tracing::debug!(path = rel, size = metadata.len(), "file over size limit, skipping");
            return Ok(None);
        }

        let bytes = fs::read(&full_path)?;
        let content = String::from_utf8_lossy(&bytes);
        let mut parsed = parser.parse(rel, &content).map_err(|err| match err {
            GraphError::ParseInput { .. } => err,
            other => GraphError::ParseInput {
                path: rel.to_string(),
                message: other.to_string(),
            },
        })?;

        if parsed.path.trim().is_empty() {
            parsed.path = rel.to_string();
        }
        if parsed.content_hash.is_none() {
            parsed.content_hash = Some(hash_sha256(&content));
        }
        if parsed.lines_total.is_none() {
            parsed.lines_total = Some(i64::try_from(content.lines().count()).unwrap_or(i64::MAX));
        }
        Ok(Some(parsed))
    }

    fn record(&self, report: &mut BatchReport, path: &str, outcome: Result<IndexResult>) {
        match outcome {
            Ok(result) => report.results.push(result),
            Err(err) => {
                tracing::error!(path, error = %err, "failed to index file");
                report.failures.push(FileFailure {
                    path: path.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
}

/// A relation that passed validation, still naming its source symbol.
#[derive(Debug, Clone)]
struct PendingSource {
    kind: RelationKind,
    source: Option<String>,
    target: String,
    line: Option<i64>,
    entry: String,
}

fn validate(
    path: &str,
    parsed: &ParsedFile,
) -> (Vec<SymbolInput>, Vec<PendingSource>, Vec<ParseInputError>) {
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(parsed.symbols.len());

    for (idx, raw) in parsed.symbols.iter().enumerate() {
        match validate_symbol(path, raw) {
            Ok(symbol) => {
                let key = (symbol.name.clone(), symbol.kind, symbol.line_start);
                if seen.insert(key) {
                    symbols.push(symbol);
                } else {
                    warnings.push(ParseInputError::new(
                        format!("symbols[{idx}] `{}`", raw.name),
                        format!("duplicate definition at line {}", symbol.line_start),
                    ));
                }
            }
            Err(reason) => warnings.push(ParseInputError::new(
                format!("symbols[{idx}] `{}`", raw.name),
                reason,
            )),
        }
    }

    let mut relations = Vec::with_capacity(parsed.relations.len());
    for (idx, raw) in parsed.relations.iter().enumerate() {
        let entry = format!("relations[{idx}] -> `{}`", raw.target);
        match validate_relation(raw) {
            Ok(kind) => relations.push(PendingSource {
                kind,
                source: raw.source.as_deref().map(str::trim).map(str::to_string),
                target: raw.target.trim().to_string(),
                line: raw.line,
                entry,
            }),
            Err(reason) => warnings.push(ParseInputError::new(entry, reason)),
        }
    }

    (symbols, relations, warnings)
}

fn validate_symbol(path: &str, raw: &ParsedSymbol) -> std::result::Result<SymbolInput, String> {
    let name = raw.name.trim();
    if name.is_empty() {
        return Err("missing symbol name".to_string());
    }
    let Some(line_start) = raw.line_start else {
        return Err("missing line_start".to_string());
    };
    if line_start < 0 {
        return Err(format!("negative line_start {line_start}"));
    }
    let line_end = raw.line_end.unwrap_or(line_start).max(line_start);
    let kind = db::parse_symbol_kind(&raw.kind).unwrap_or(SymbolKind::Variable);
    let qualified_name = raw
        .qualified_name
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map_or_else(|| default_qualified_name(path, name), str::to_string);

    Ok(SymbolInput {
        name: name.to_string(),
        qualified_name,
        kind,
        signature: raw.signature.clone().filter(|s| !s.trim().is_empty()),
        line_start,
        line_end,
    })
}

fn validate_relation(raw: &ParsedRelation) -> std::result::Result<RelationKind, String> {
    if raw.target.trim().is_empty() {
        return Err("missing target".to_string());
    }
    let kind = db::parse_relation_kind(&raw.kind).unwrap_or(RelationKind::References);
    if !kind.is_file_level() && raw.source.as_deref().is_none_or(|s| s.trim().is_empty()) {
        return Err(format!("{} relation without source", raw.kind));
    }
    Ok(kind)
}

/// Maps each relation's source name onto a stored symbol of this file. When
/// a name is defined more than once, the definition whose line range
/// encloses the relation line wins (innermost first).
fn bind_sources(
    relations: &[PendingSource],
    stored: &[Symbol],
    warnings: &mut Vec<ParseInputError>,
) -> Vec<NewRelation> {
    let mut bound = Vec::with_capacity(relations.len());
    for relation in relations {
        if relation.kind.is_file_level() {
            bound.push(NewRelation {
                kind: relation.kind,
                source_symbol_id: None,
                target: relation.target.clone(),
                line: relation.line,
            });
            continue;
        }

        let source = relation.source.as_deref().unwrap_or_default();
        let mut candidates: Vec<&Symbol> = stored
            .iter()
            .filter(|s| s.qualified_name == source)
            .collect();
        if candidates.is_empty() {
            candidates = stored.iter().filter(|s| s.name == source).collect();
        }
        if candidates.len() > 1 {
            if let Some(line) = relation.line {
                let mut enclosing: Vec<&Symbol> = candidates
                    .iter()
                    .copied()
                    .filter(|s| s.line_start <= line && line <= s.line_end)
                    .collect();
                enclosing.sort_by_key(|s| (s.line_end - s.line_start, s.line_start, s.id));
                if !enclosing.is_empty() {
                    candidates = enclosing;
                }
            }
        }

        match candidates.first() {
            Some(symbol) => bound.push(NewRelation {
                kind: relation.kind,
                source_symbol_id: Some(symbol.id),
                target: relation.target.clone(),
                line: relation.line,
            }),
            None => warnings.push(ParseInputError::new(
                relation.entry.clone(),
                format!("source `{source}` is not defined in this file"),
            )),
        }
    }
    bound
}

fn scan_directory(
    root_dir: &Path,
    matcher: &PathMatcher,
    mut on_progress: impl FnMut(usize, &str),
) -> Vec<String> {
    let mut files = Vec::new();
    let mut stack = vec![root_dir.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(rel_path) = path.strip_prefix(root_dir) else {
                continue;
            };
            let rel_str = normalize_path(&rel_path.to_string_lossy());
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if !matcher.is_excluded_dir(&rel_str) {
                    stack.push(path);
                }
            } else if file_type.is_file() && matcher.is_included(&rel_str) {
                files.push(rel_str);
                on_progress(files.len(), files.last().map_or("", String::as_str));
            }
        }
    }

    files.sort();
    files
}

pub fn detect_language(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|v| v.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        _ => "unknown",
    }
}
