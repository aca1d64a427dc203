#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use rusqlite::Connection;

use crate::config::TraversalConfig;
use crate::db;
use crate::error::{GraphError, Result};
use crate::graph::{self, Expansion};
use crate::resolution::{narrow_by_qualifier, unqualified};
use crate::store::GraphStore;
use crate::types::{
    DepthCount, DepthLevel, FileEntity, FileId, FileImpact, ImpactEntity, ImpactReason,
    IncludeTree, QuerySummary, RelationKind, Symbol, SymbolEntity, SymbolId, SymbolTraversal,
    TraversalDirection, TraversalResult,
};

const FILE_LINKS: [RelationKind; 2] = [RelationKind::Includes, RelationKind::Imports];

/// Read-only traversal queries over a [`GraphStore`].
///
/// Every query runs inside one read transaction, so it sees a single
/// committed snapshot even while the indexer is writing.
#[derive(Debug, Clone, Copy)]
pub struct TraversalEngine<'a> {
    store: &'a GraphStore,
    config: TraversalConfig,
}

impl<'a> TraversalEngine<'a> {
    pub fn new(store: &'a GraphStore, config: TraversalConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    /// Everything that (transitively) calls `symbol_id`.
    pub fn get_symbol_callers(
        &self,
        symbol_id: SymbolId,
        max_depth: Option<usize>,
    ) -> Result<SymbolTraversal> {
        let depth = self.config.effective_depth(max_depth);
        self.timed("callers", &symbol_id.to_string(), || {
            self.symbol_traversal(symbol_id, &[RelationKind::Calls], TraversalDirection::Incoming, depth)
        })
    }

    /// Everything `symbol_id` (transitively) calls.
    pub fn get_symbol_callees(
        &self,
        symbol_id: SymbolId,
        max_depth: Option<usize>,
    ) -> Result<SymbolTraversal> {
        let depth = self.config.effective_depth(max_depth);
        self.timed("callees", &symbol_id.to_string(), || {
            self.symbol_traversal(symbol_id, &[RelationKind::Calls], TraversalDirection::Outgoing, depth)
        })
    }

    /// Symbols that use the type as a field, return or parameter type.
    /// Defaults to direct users only.
    pub fn get_type_users(
        &self,
        symbol_id: SymbolId,
        max_depth: Option<usize>,
    ) -> Result<SymbolTraversal> {
        let depth = self
            .config
            .effective_depth(Some(max_depth.unwrap_or(self.config.type_users_depth)));
        self.timed("type_users", &symbol_id.to_string(), || {
            self.symbol_traversal(
                symbol_id,
                &RelationKind::TYPE_USAGE,
                TraversalDirection::Incoming,
                depth,
            )
        })
    }

    /// Files reachable from `path` through include/import edges.
    pub fn get_include_tree(&self, path: &str, max_depth: Option<usize>) -> Result<IncludeTree> {
        let depth = self.config.effective_depth(max_depth);
        let path = crate::utils::normalize_path(path);
        self.timed("include_tree", &path, || {
            self.store.read(|conn| {
                let root = root_file(conn, &path)?;
                let expansion = graph::bounded_bfs(&[root.id], depth, |id| {
                    db::file_neighbors(conn, id, &FILE_LINKS, TraversalDirection::Outgoing)
                })?;
                let ids: Vec<FileId> = expansion.reached.iter().map(|(id, _)| *id).collect();
                let entities = db::file_entities(conn, &ids)?
                    .into_iter()
                    .map(|e| (e.id, e))
                    .collect();
                let by_depth = group_by_depth(&expansion.reached, entities, |e: &FileEntity| {
                    (e.path.clone(), String::new(), e.id)
                });
                Ok(finish(root, depth, by_depth, expansion.truncated, |e| &e.path, |e| e.is_critical))
            })
        })
    }

    /// Files affected by a change to `path`: files holding transitive callers
    /// of any of its symbols, plus files that transitively include it.
    pub fn get_file_impact(&self, path: &str, max_depth: Option<usize>) -> Result<FileImpact> {
        let depth = self.config.effective_depth(max_depth);
        let path = crate::utils::normalize_path(path);
        self.timed("file_impact", &path, || {
            self.store.read(|conn| {
                let root = root_file(conn, &path)?;
                let symbol_ids: Vec<SymbolId> = db::symbols_for_file(conn, root.id)?
                    .into_iter()
                    .map(|s| s.id)
                    .collect();

                let callers = graph::bounded_bfs(&symbol_ids, depth, |id| {
                    db::symbol_neighbors(conn, id, &[RelationKind::Calls], TraversalDirection::Incoming)
                })?;
                let includers = graph::bounded_bfs(&[root.id], depth, |id| {
                    db::file_neighbors(conn, id, &FILE_LINKS, TraversalDirection::Incoming)
                })?;

                let impacted = merge_impact(conn, root.id, &callers, &includers)?;
                let reached: Vec<(FileId, usize)> =
                    impacted.iter().map(|(id, (d, _))| (*id, *d)).collect();
                let ids: Vec<FileId> = reached.iter().map(|(id, _)| *id).collect();
                let mut reasons: HashMap<FileId, BTreeSet<ImpactReason>> =
                    impacted.into_iter().map(|(id, (_, r))| (id, r)).collect();

                let entities = db::file_entities(conn, &ids)?
                    .into_iter()
                    .map(|f| {
                        let entity = ImpactEntity {
                            file_id: f.id,
                            reasons: reasons.remove(&f.id).unwrap_or_default(),
                            path: f.path,
                            language: f.language,
                            is_critical: f.is_critical,
                        };
                        (entity.file_id, entity)
                    })
                    .collect();
                let by_depth = group_by_depth(&reached, entities, |e: &ImpactEntity| {
                    (e.path.clone(), String::new(), e.file_id)
                });
                let truncated = callers.truncated || includers.truncated;
                Ok(finish(root, depth, by_depth, truncated, |e| &e.path, |e| e.is_critical))
            })
        })
    }

    /// Resolves a possibly ambiguous name to one symbol.
    ///
    /// An exact qualified-name match wins, then a unique bare-name match. Only
    /// when several candidates remain is `hint` applied: a candidate passes if
    /// its file path equals or ends with the hint, or its qualified name
    /// starts with it.
    pub fn get_symbol_by_name_qualified(&self, name: &str, hint: Option<&str>) -> Result<Symbol> {
        let name = name.trim();
        self.store.read(|conn| {
            let mut candidates = db::find_symbols_by_qualified_name(conn, name)?;
            if candidates.is_empty() {
                let bare = db::find_symbols_by_name(conn, unqualified(name), None)?;
                candidates = narrow_by_qualifier(bare, name);
            }

            if candidates.len() > 1 {
                if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
                    candidates.retain(|s| matches_hint(s, hint));
                    if candidates.is_empty() {
                        return Err(GraphError::not_found("symbol", format!("{name} (hint {hint})")));
                    }
                }
            }

            match candidates.len() {
                0 => Err(GraphError::not_found("symbol", name)),
                1 => Ok(candidates.remove(0)),
                _ => Err(GraphError::AmbiguousSymbol {
                    name: name.to_string(),
                    candidates,
                }),
            }
        })
    }

    /// Shortest call chain from `from` to `to`, both ends included.
    pub fn find_dependency_chain(
        &self,
        from: SymbolId,
        to: SymbolId,
        max_depth: Option<usize>,
    ) -> Result<Option<Vec<SymbolEntity>>> {
        let depth = self.config.effective_depth(max_depth);
        self.timed("dependency_chain", &format!("{from}->{to}"), || {
            self.store.read(|conn| {
                for id in [from, to] {
                    if db::get_symbol(conn, id)?.is_none() {
                        return Err(GraphError::not_found("symbol", id.to_string()));
                    }
                }
                let path = graph::shortest_path(from, to, depth, |id| {
                    db::symbol_neighbors(conn, id, &[RelationKind::Calls], TraversalDirection::Outgoing)
                })?;
                let Some(path) = path else {
                    return Ok(None);
                };
                let mut by_id: HashMap<SymbolId, SymbolEntity> = db::symbol_entities(conn, &path)?
                    .into_iter()
                    .map(|e| (e.id, e))
                    .collect();
                Ok(Some(path.iter().filter_map(|id| by_id.remove(id)).collect()))
            })
        })
    }

    /// Symbols defined in files matched by the critical-path globs.
    pub fn critical_symbols(&self) -> Result<Vec<SymbolEntity>> {
        self.store.read(|conn| {
            Ok(db::symbols_in_critical_files(conn)?
                .into_iter()
                .map(|s| SymbolEntity {
                    id: s.id,
                    name: s.name,
                    qualified_name: s.qualified_name,
                    kind: s.kind,
                    file_path: s.file_path,
                    line_start: s.line_start,
                    is_critical: true,
                })
                .collect())
        })
    }

    fn symbol_traversal(
        &self,
        symbol_id: SymbolId,
        kinds: &[RelationKind],
        direction: TraversalDirection,
        depth: usize,
    ) -> Result<SymbolTraversal> {
        self.store.read(|conn| {
            let root = db::symbol_entities(conn, &[symbol_id])?
                .into_iter()
                .next()
                .ok_or_else(|| GraphError::not_found("symbol", symbol_id.to_string()))?;
            let expansion = graph::bounded_bfs(&[symbol_id], depth, |id| {
                db::symbol_neighbors(conn, id, kinds, direction)
            })?;
            let by_depth = symbol_levels(conn, &expansion)?;
            Ok(finish(
                root,
                depth,
                by_depth,
                expansion.truncated,
                |e| &e.file_path,
                |e| e.is_critical,
            ))
        })
    }

    fn timed<T>(&self, query: &'static str, key: &str, run: impl FnOnce() -> Result<T>) -> Result<T> {
        let started = Instant::now();
        let out = run();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if elapsed_ms > self.config.slow_query_ms {
            tracing::warn!(query, key, elapsed_ms, "slow traversal query");
        } else {
            tracing::debug!(query, key, elapsed_ms, "traversal query");
        }
        out
    }
}

fn root_file(conn: &Connection, path: &str) -> Result<FileEntity> {
    let file = db::get_file_by_path(conn, path)?.ok_or_else(|| GraphError::not_found("file", path))?;
    Ok(FileEntity {
        id: file.id,
        path: file.path,
        language: file.language,
        is_critical: file.is_critical,
        is_stale: file.is_stale,
    })
}

fn matches_hint(symbol: &Symbol, hint: &str) -> bool {
    let hint_path = crate::utils::normalize_path(hint);
    symbol.file_path == hint_path
        || symbol.file_path.ends_with(&format!("/{hint_path}"))
        || symbol.qualified_name.starts_with(&format!("{hint}::"))
        || symbol.qualified_name.starts_with(&format!("{hint}."))
}

fn symbol_levels(conn: &Connection, expansion: &Expansion) -> Result<Vec<DepthLevel<SymbolEntity>>> {
    let ids: Vec<SymbolId> = expansion.reached.iter().map(|(id, _)| *id).collect();
    let entities = db::symbol_entities(conn, &ids)?
        .into_iter()
        .map(|e| (e.id, e))
        .collect();
    Ok(group_by_depth(&expansion.reached, entities, |e: &SymbolEntity| {
        (e.file_path.clone(), e.name.clone(), e.id)
    }))
}

/// Per-file minimum depth and reasons. The changed file itself is excluded.
fn merge_impact(
    conn: &Connection,
    root: FileId,
    callers: &Expansion,
    includers: &Expansion,
) -> Result<BTreeMap<FileId, (usize, BTreeSet<ImpactReason>)>> {
    let mut merged: BTreeMap<FileId, (usize, BTreeSet<ImpactReason>)> = BTreeMap::new();
    let mut note = |file_id: FileId, depth: usize, reason: ImpactReason| {
        if file_id == root {
            return;
        }
        let entry = merged.entry(file_id).or_insert((depth, BTreeSet::new()));
        entry.0 = entry.0.min(depth);
        entry.1.insert(reason);
    };

    let caller_depths: HashMap<SymbolId, usize> = callers.reached.iter().copied().collect();
    let caller_ids: Vec<SymbolId> = callers.reached.iter().map(|(id, _)| *id).collect();
    for (symbol_id, file_id) in db::symbol_files(conn, &caller_ids)? {
        if let Some(&depth) = caller_depths.get(&symbol_id) {
            note(file_id, depth, ImpactReason::Calls);
        }
    }
    for &(file_id, depth) in &includers.reached {
        note(file_id, depth, ImpactReason::Includes);
    }

    Ok(merged)
}

/// Buckets entities by depth and orders each bucket by `key`.
fn group_by_depth<E, K: Ord>(
    reached: &[(i64, usize)],
    mut entities: HashMap<i64, E>,
    key: impl Fn(&E) -> K,
) -> Vec<DepthLevel<E>> {
    let mut levels: BTreeMap<usize, Vec<E>> = BTreeMap::new();
    for (id, depth) in reached {
        if let Some(entity) = entities.remove(id) {
            levels.entry(*depth).or_default().push(entity);
        }
    }
    levels
        .into_iter()
        .map(|(depth, mut entities)| {
            entities.sort_by_key(|e| key(e));
            DepthLevel { depth, entities }
        })
        .collect()
}

fn finish<R, E>(
    root: R,
    max_depth: usize,
    by_depth: Vec<DepthLevel<E>>,
    truncated: bool,
    path_of: impl Fn(&E) -> &String,
    is_critical: impl Fn(&E) -> bool,
) -> TraversalResult<R, E> {
    let mut files = BTreeSet::new();
    let mut critical_entities = 0;
    for entity in by_depth.iter().flat_map(|level| level.entities.iter()) {
        files.insert(path_of(entity).clone());
        if is_critical(entity) {
            critical_entities += 1;
        }
    }

    let summary = QuerySummary {
        total_entities: by_depth.iter().map(|l| l.entities.len()).sum(),
        entities_per_depth: by_depth
            .iter()
            .map(|l| DepthCount {
                depth: l.depth,
                count: l.entities.len(),
            })
            .collect(),
        max_depth_reached: by_depth.last().map_or(0, |l| l.depth),
        files_affected: files.into_iter().collect(),
        critical_entities,
        truncated,
    };

    TraversalResult {
        root,
        max_depth,
        summary,
        by_depth,
        truncated,
    }
}
