#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DATA_DIR: &str = ".symgraph";
pub const CONFIG_FILENAME: &str = "config.toml";

pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const MAX_DEPTH_CAP: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub version: i64,
    pub root_dir: String,
    pub indexing: IndexingConfig,
    pub traversal: TraversalConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub critical_paths: Vec<String>,
    pub max_file_size: u64,
    pub parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub default_max_depth: usize,
    pub max_depth_cap: usize,
    pub type_users_depth: usize,
    pub slow_query_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        create_default_config(Path::new("."))
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include: default_include_patterns(),
            exclude: default_exclude_patterns(),
            critical_paths: default_critical_patterns(),
            max_file_size: 1024 * 1024,
            parallel: true,
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_max_depth: DEFAULT_MAX_DEPTH,
            max_depth_cap: MAX_DEPTH_CAP,
            type_users_depth: 1,
            slow_query_ms: 250,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TraversalConfig {
    /// Clamps a requested depth into `1..=max_depth_cap`.
    pub fn effective_depth(&self, requested: Option<usize>) -> usize {
        let cap = self.max_depth_cap.max(1);
        requested
            .unwrap_or(self.default_max_depth)
            .clamp(1, cap)
    }
}

pub fn data_dir(project_root: &Path) -> PathBuf {
    project_root.join(DATA_DIR)
}

pub fn config_path(project_root: &Path) -> PathBuf {
    data_dir(project_root).join(CONFIG_FILENAME)
}

pub fn create_default_config(project_root: &Path) -> GraphConfig {
    GraphConfig {
        version: 1,
        root_dir: project_root.to_string_lossy().to_string(),
        indexing: IndexingConfig::default(),
        traversal: TraversalConfig::default(),
        logging: LoggingConfig::default(),
    }
}

pub fn load_config(project_root: &Path) -> Result<GraphConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(create_default_config(project_root));
    }

    let raw = fs::read_to_string(&path)?;
    let mut config: GraphConfig = toml::from_str(&raw)?;
    config.root_dir = project_root.to_string_lossy().to_string();
    Ok(config)
}

pub fn save_config(project_root: &Path, config: &GraphConfig) -> Result<()> {
    let path = config_path(project_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut to_save = config.clone();
    to_save.root_dir = ".".to_string();
    let raw = toml::to_string_pretty(&to_save)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn add_include_patterns(config: &mut GraphConfig, patterns: &[String]) {
    merge_patterns(&mut config.indexing.include, patterns);
}

pub fn add_exclude_patterns(config: &mut GraphConfig, patterns: &[String]) {
    merge_patterns(&mut config.indexing.exclude, patterns);
}

pub fn add_critical_patterns(config: &mut GraphConfig, patterns: &[String]) {
    merge_patterns(&mut config.indexing.critical_paths, patterns);
}

fn merge_patterns(target: &mut Vec<String>, patterns: &[String]) {
    for pattern in patterns {
        if !target.contains(pattern) {
            target.push(pattern.clone());
        }
    }
}

/// Compiled include/exclude/critical globs.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    include: GlobSet,
    exclude: GlobSet,
    critical: GlobSet,
}

impl PathMatcher {
    pub fn new(config: &IndexingConfig) -> Result<Self> {
        Ok(Self {
            include: build_glob_set(&config.include)?,
            exclude: build_glob_set(&config.exclude)?,
            critical: build_glob_set(&config.critical_paths)?,
        })
    }

    pub fn is_included(&self, path: &str) -> bool {
        !self.exclude.is_match(path) && self.include.is_match(path)
    }

    /// Directories are matched with a trailing slash so `**/build/**` prunes
    /// the whole subtree.
    pub fn is_excluded_dir(&self, rel_dir: &str) -> bool {
        self.exclude.is_match(format!("{rel_dir}/"))
            || self.exclude.is_match(format!("{rel_dir}/x"))
    }

    pub fn is_critical(&self, path: &str) -> bool {
        self.critical.is_match(path)
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

pub fn default_include_patterns() -> Vec<String> {
    vec![
        "**/*.c",
        "**/*.h",
        "**/*.cpp",
        "**/*.hpp",
        "**/*.cc",
        "**/*.hh",
        "**/*.cxx",
        "**/*.hxx",
        "**/*.py",
        "**/*.js",
        "**/*.jsx",
        "**/*.ts",
        "**/*.tsx",
        "**/*.go",
        "**/*.rs",
        "**/*.java",
    ]
    .into_iter()
    .map(std::string::ToString::to_string)
    .collect()
}

pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**",
        "**/.symgraph/**",
        "**/node_modules/**",
        "**/vendor/**",
        "**/build/**",
        "**/dist/**",
        "**/target/**",
        "**/__pycache__/**",
        "**/.venv/**",
        "**/*.min.js",
        "**/*.generated.*",
    ]
    .into_iter()
    .map(std::string::ToString::to_string)
    .collect()
}

pub fn default_critical_patterns() -> Vec<String> {
    vec![
        "**/security/**",
        "**/auth/**",
        "**/crypto/**",
        "**/*password*",
        "**/*secret*",
        "**/*token*",
    ]
    .into_iter()
    .map(std::string::ToString::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.traversal.default_max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.root_dir, dir.path().to_string_lossy());
    }

    #[test]
    fn saved_config_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut config = create_default_config(dir.path());
        config.traversal.slow_query_ms = 10;
        add_critical_patterns(&mut config, &["**/boot/**".to_string()]);
        add_critical_patterns(&mut config, &["**/boot/**".to_string()]);
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded
                .indexing
                .critical_paths
                .iter()
                .filter(|p| p.as_str() == "**/boot/**")
                .count(),
            1
        );
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_sections() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(data_dir(dir.path())).unwrap();
        std::fs::write(
            config_path(dir.path()),
            "[traversal]\ndefault_max_depth = 3\n",
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.traversal.default_max_depth, 3);
        assert_eq!(config.traversal.max_depth_cap, MAX_DEPTH_CAP);
        assert_eq!(config.indexing.include, default_include_patterns());
    }

    #[test]
    fn effective_depth_is_clamped() {
        let cfg = TraversalConfig::default();
        assert_eq!(cfg.effective_depth(None), DEFAULT_MAX_DEPTH);
        assert_eq!(cfg.effective_depth(Some(0)), 1);
        assert_eq!(cfg.effective_depth(Some(1000)), MAX_DEPTH_CAP);
    }

    #[test]
    fn matcher_applies_excludes_and_critical_paths() {
        let matcher = PathMatcher::new(&IndexingConfig::default()).unwrap();
        assert!(matcher.is_included("src/lcd/init.c"));
        assert!(!matcher.is_included("build/gen/init.c"));
        assert!(!matcher.is_included("README.md"));
        assert!(matcher.is_excluded_dir("node_modules"));
        assert!(matcher.is_critical("src/auth/login.c"));
        assert!(matcher.is_critical("src/util/password_hash.c"));
        assert!(!matcher.is_critical("src/lcd/init.c"));
    }
}
