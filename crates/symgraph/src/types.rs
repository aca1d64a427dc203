#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub type FileId = i64;
pub type SymbolId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Macro,
    Struct,
    Class,
    Enum,
    Union,
    Typedef,
    TypeAlias,
    Interface,
    Trait,
    Variable,
    Constant,
    Field,
    Property,
    Parameter,
    Module,
    Namespace,
}

impl SymbolKind {
    pub const fn is_callable(self) -> bool {
        matches!(self, Self::Function | Self::Method | Self::Macro)
    }

    pub const fn is_type(self) -> bool {
        matches!(
            self,
            Self::Struct
                | Self::Class
                | Self::Enum
                | Self::Union
                | Self::Typedef
                | Self::TypeAlias
                | Self::Interface
                | Self::Trait
        )
    }

    pub const fn is_value(self) -> bool {
        matches!(
            self,
            Self::Variable | Self::Constant | Self::Field | Self::Property | Self::Parameter
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    References,
    Overrides,
    Inherits,
    Implements,
    UsesType,
    ReturnsType,
    HasParamType,
    Instantiates,
    UsesMacro,
    UsesVariable,
    Includes,
    Imports,
}

impl RelationKind {
    /// Relation kinds that count as "using" a type.
    pub const TYPE_USAGE: [Self; 3] = [Self::UsesType, Self::ReturnsType, Self::HasParamType];

    /// File relations connect two files rather than two symbols.
    pub const fn is_file_level(self) -> bool {
        matches!(self, Self::Includes | Self::Imports)
    }
}

/// Target of an edge: either a known symbol/file id or the name it was
/// written as, waiting for a definition to appear.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationTarget {
    Resolved(i64),
    Pending(String),
}

impl RelationTarget {
    pub const fn resolved_id(&self) -> Option<i64> {
        match self {
            Self::Resolved(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }

    pub fn placeholder(&self) -> Option<&str> {
        match self {
            Self::Resolved(_) => None,
            Self::Pending(name) => Some(name),
        }
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub path: String,
    pub content_hash: String,
    pub language: String,
    pub lines_total: i64,
    pub symbol_count: i64,
    pub last_indexed_at: i64,
    pub is_critical: bool,
    pub is_stale: bool,
}

/// Values written by `upsert_file`; the path is the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpsert {
    pub path: String,
    pub content_hash: String,
    pub language: String,
    pub lines_total: i64,
    pub is_critical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub file_id: FileId,
    pub file_path: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub line_start: i64,
    pub line_end: i64,
    pub definition_hash: String,
}

/// A validated symbol definition about to be reconciled into a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInput {
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub line_start: i64,
    pub line_end: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRelation {
    pub id: i64,
    pub kind: RelationKind,
    pub source_symbol_id: SymbolId,
    pub target: RelationTarget,
    pub line: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRelation {
    pub id: i64,
    pub kind: RelationKind,
    pub source_file_id: FileId,
    pub target: RelationTarget,
    pub line: Option<i64>,
}

/// An edge to insert. `source_symbol_id` is required for symbol relations and
/// ignored for file relations, whose source is the owning file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelation {
    pub kind: RelationKind,
    pub source_symbol_id: Option<SymbolId>,
    pub target: String,
    pub line: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDiff {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInsertReport {
    pub inserted: usize,
    pub resolved: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResult {
    pub scanned: usize,
    pub resolved: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub files: i64,
    pub stale_files: i64,
    pub critical_files: i64,
    pub symbols: i64,
    pub relations: i64,
    pub pending_relations: i64,
    pub file_relations: i64,
    pub pending_file_relations: i64,
}

// ---------------------------------------------------------------------------
// Parser input contract
// ---------------------------------------------------------------------------

/// Output of the external parsing collaborator for one file.
///
/// Entries are best-effort: every field an entry could get wrong is optional
/// or a plain string so one bad entry never fails deserialization of the
/// whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_total: Option<i64>,
    #[serde(default)]
    pub symbols: Vec<ParsedSymbol>,
    #[serde(default)]
    pub relations: Vec<ParsedRelation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSymbol {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub line_start: Option<i64>,
    #[serde(default)]
    pub line_end: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRelation {
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntity {
    pub id: SymbolId,
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub line_start: i64,
    pub is_critical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntity {
    pub id: FileId,
    pub path: String,
    pub language: String,
    pub is_critical: bool,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactReason {
    Calls,
    Includes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactEntity {
    pub file_id: FileId,
    pub path: String,
    pub language: String,
    pub is_critical: bool,
    pub reasons: BTreeSet<ImpactReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthCount {
    pub depth: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub total_entities: usize,
    pub entities_per_depth: Vec<DepthCount>,
    pub max_depth_reached: usize,
    pub files_affected: Vec<String>,
    pub critical_entities: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel<E> {
    pub depth: usize,
    pub entities: Vec<E>,
}

/// Result shape shared by every traversal query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalResult<R, E> {
    pub root: R,
    pub max_depth: usize,
    pub summary: QuerySummary,
    pub by_depth: Vec<DepthLevel<E>>,
    pub truncated: bool,
}

impl<R, E> TraversalResult<R, E> {
    pub fn entities(&self) -> impl Iterator<Item = (usize, &E)> {
        self.by_depth
            .iter()
            .flat_map(|level| level.entities.iter().map(move |e| (level.depth, e)))
    }
}

pub type SymbolTraversal = TraversalResult<SymbolEntity, SymbolEntity>;
pub type IncludeTree = TraversalResult<FileEntity, FileEntity>;
pub type FileImpact = TraversalResult<FileEntity, ImpactEntity>;
