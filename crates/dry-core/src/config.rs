//! Per-repo configuration loading, caching, and validation.
//!
//! Configuration lives in an optional `dryconfig.json` at the repo root and
//! is merged over compiled-in defaults. Unknown fields are ignored;
//! wrong-typed fields are rejected with a descriptive error. Loaded configs
//! are cached per normalized repo path, and concurrent loads for the same
//! repo share a single in-flight read.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{DryError, DryResult};

/// File name of the per-repo configuration, relative to the repo root.
pub const CONFIG_FILE: &str = "dryconfig.json";

/// Resolved, normalized DryScan configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryConfig {
    /// Additional gitignore-style globs excluded from scanning.
    #[serde(default = "DryConfig::default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// Canonical pair keys suppressed from duplicate reports.
    #[serde(default)]
    pub excluded_pairs: Vec<String>,

    /// Minimum line span for class and function units.
    #[serde(default = "DryConfig::default_min_lines")]
    pub min_lines: u32,

    /// Minimum line span for block units.
    #[serde(default = "DryConfig::default_min_block_lines")]
    pub min_block_lines: u32,

    /// Function-level similarity threshold in [0, 1].
    #[serde(default = "DryConfig::default_threshold")]
    pub threshold: f64,

    /// Base URL of the embedding service.
    #[serde(default = "DryConfig::default_embedding_source")]
    pub embedding_source: String,

    /// Embedding model id.
    #[serde(default = "DryConfig::default_embedding_model")]
    pub embedding_model: String,

    /// Token budget passed to the embedder as `num_ctx`.
    #[serde(default = "DryConfig::default_context_length")]
    pub context_length: u32,
}

impl Default for DryConfig {
    fn default() -> Self {
        Self {
            excluded_paths: Self::default_excluded_paths(),
            excluded_pairs: Vec::new(),
            min_lines: Self::default_min_lines(),
            min_block_lines: Self::default_min_block_lines(),
            threshold: Self::default_threshold(),
            embedding_source: Self::default_embedding_source(),
            embedding_model: Self::default_embedding_model(),
            context_length: Self::default_context_length(),
        }
    }
}

impl DryConfig {
    fn default_excluded_paths() -> Vec<String> {
        vec!["**/test/**".into()]
    }

    fn default_min_lines() -> u32 {
        3
    }

    fn default_min_block_lines() -> u32 {
        5
    }

    fn default_threshold() -> f64 {
        0.88
    }

    fn default_embedding_source() -> String {
        "http://localhost:11434".into()
    }

    fn default_embedding_model() -> String {
        "embeddinggemma".into()
    }

    fn default_context_length() -> u32 {
        2048
    }

    /// Normalize a freshly parsed config in place.
    ///
    /// String arrays are trimmed with empties dropped; numeric fields must be
    /// finite; the threshold is clamped into [0, 1]; the embedding source
    /// loses any trailing slash.
    pub fn normalize(&mut self) -> DryResult<()> {
        if !self.threshold.is_finite() {
            return Err(DryError::Config {
                details: format!("threshold must be a finite number, got {}", self.threshold),
            });
        }
        self.threshold = self.threshold.clamp(0.0, 1.0);

        normalize_string_array(&mut self.excluded_paths);
        normalize_string_array(&mut self.excluded_pairs);

        self.embedding_source = self.embedding_source.trim().trim_end_matches('/').to_string();
        if self.embedding_source.is_empty() {
            self.embedding_source = Self::default_embedding_source();
        }
        self.embedding_model = self.embedding_model.trim().to_string();
        if self.embedding_model.is_empty() {
            self.embedding_model = Self::default_embedding_model();
        }

        Ok(())
    }
}

fn normalize_string_array(values: &mut Vec<String>) {
    for v in values.iter_mut() {
        *v = v.trim().to_string();
    }
    values.retain(|v| !v.is_empty());
}

/// Parse and normalize a raw `dryconfig.json` document.
///
/// Unknown fields are ignored (serde default); wrong-typed fields surface
/// the serde error verbatim so users see which field is broken.
pub fn parse_config(raw: &str) -> DryResult<DryConfig> {
    let mut config: DryConfig = serde_json::from_str(raw).map_err(|e| DryError::Config {
        details: format!("invalid {CONFIG_FILE}: {e}"),
    })?;
    config.normalize()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Config store
// ---------------------------------------------------------------------------

static STORE: OnceLock<ConfigStore> = OnceLock::new();

/// Get the process-wide config store.
pub fn store() -> &'static ConfigStore {
    STORE.get_or_init(ConfigStore::new)
}

/// Cached mapping from normalized repo path to resolved config.
///
/// Each repo path owns a `tokio::sync::OnceCell`, so a second concurrent
/// `get` for the same repo awaits the in-flight load instead of issuing a
/// second read.
pub struct ConfigStore {
    cells: DashMap<PathBuf, Arc<OnceCell<DryConfig>>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Create an empty store. Library consumers normally use [`store()`].
    pub fn new() -> Self {
        Self { cells: DashMap::new() }
    }

    /// Resolve the config for a repo, loading and caching it on first use.
    pub async fn get(&self, repo_path: &Path) -> DryResult<DryConfig> {
        let key = normalize_repo_path(repo_path);
        let cell = self
            .cells
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let config = cell
            .get_or_try_init(|| load_config(repo_path))
            .await?;
        Ok(config.clone())
    }

    /// Drop any cached config for a repo and reload it from disk.
    pub async fn refresh(&self, repo_path: &Path) -> DryResult<DryConfig> {
        self.cells.remove(&normalize_repo_path(repo_path));
        self.get(repo_path).await
    }

    /// Initialize a repo's config, writing `dryconfig.json` when overrides
    /// are supplied, and cache the result.
    pub async fn init(
        &self,
        repo_path: &Path,
        overrides: Option<DryConfig>,
    ) -> DryResult<DryConfig> {
        match overrides {
            Some(mut config) => {
                config.normalize()?;
                self.save(repo_path, &config).await?;
                Ok(config)
            }
            None => self.get(repo_path).await,
        }
    }

    /// Persist a config to the repo's `dryconfig.json` and update the cache.
    pub async fn save(&self, repo_path: &Path, config: &DryConfig) -> DryResult<()> {
        let path = repo_path.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| DryError::Serialization(e.to_string()))?;
        tokio::fs::write(&path, json).await?;

        self.cells.insert(
            normalize_repo_path(repo_path),
            Arc::new(OnceCell::new_with(Some(config.clone()))),
        );
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }
}

async fn load_config(repo_path: &Path) -> DryResult<DryConfig> {
    let path = repo_path.join(CONFIG_FILE);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::debug!(repo = %repo_path.display(), "no dryconfig.json, using defaults");
        return Ok(DryConfig::default());
    }

    let raw = tokio::fs::read_to_string(&path).await?;
    let config = parse_config(&raw)?;
    tracing::debug!(repo = %repo_path.display(), "config loaded");
    Ok(config)
}

fn normalize_repo_path(repo_path: &Path) -> PathBuf {
    std::fs::canonicalize(repo_path).unwrap_or_else(|_| repo_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DryConfig::default();
        assert_eq!(config.excluded_paths, vec!["**/test/**".to_string()]);
        assert!(config.excluded_pairs.is_empty());
        assert_eq!(config.min_lines, 3);
        assert_eq!(config.min_block_lines, 5);
        assert!((config.threshold - 0.88).abs() < 1e-12);
        assert_eq!(config.embedding_source, "http://localhost:11434");
        assert_eq!(config.embedding_model, "embeddinggemma");
        assert_eq!(config.context_length, 2048);
    }

    #[test]
    fn test_parse_merges_over_defaults() {
        let config = parse_config(r#"{"threshold": 0.9}"#).expect("parse");
        assert!((config.threshold - 0.9).abs() < 1e-12);
        assert_eq!(config.min_lines, 3);
        assert_eq!(config.embedding_model, "embeddinggemma");
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let config = parse_config(r#"{"futureKnob": true, "minLines": 4}"#).expect("parse");
        assert_eq!(config.min_lines, 4);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let err = parse_config(r#"{"minLines": "three"}"#).expect_err("should fail");
        assert!(matches!(err, DryError::Config { .. }));
        assert!(err.to_string().contains("minLines") || err.to_string().contains("invalid"));
    }

    #[test]
    fn test_normalize_trims_and_drops_empties() {
        let config =
            parse_config(r#"{"excludedPaths": ["  foo/** ", "", "   "]}"#).expect("parse");
        assert_eq!(config.excluded_paths, vec!["foo/**".to_string()]);
    }

    #[test]
    fn test_normalize_clamps_threshold() {
        let config = parse_config(r#"{"threshold": 1.5}"#).expect("parse");
        assert!((config.threshold - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_strips_trailing_slash() {
        let config =
            parse_config(r#"{"embeddingSource": "http://embed.local:9000/"}"#).expect("parse");
        assert_eq!(config.embedding_source, "http://embed.local:9000");
    }

    #[tokio::test]
    async fn test_store_caches_and_refreshes() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = ConfigStore::new();

        let first = store.get(dir.path()).await.expect("load defaults");
        assert_eq!(first.min_lines, 3);

        // Write a config after the first load: the cache must keep serving
        // the old value until refresh.
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"minLines": 7}"#).expect("write");
        let cached = store.get(dir.path()).await.expect("cached");
        assert_eq!(cached.min_lines, 3);

        let refreshed = store.refresh(dir.path()).await.expect("refresh");
        assert_eq!(refreshed.min_lines, 7);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_load() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"minLines": 5}"#).expect("write");

        let store = Arc::new(ConfigStore::new());
        let a = store.clone();
        let b = store.clone();
        let path_a = dir.path().to_path_buf();
        let path_b = dir.path().to_path_buf();

        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.get(&path_a).await }),
            tokio::spawn(async move { b.get(&path_b).await }),
        );
        let ca = ra.expect("join").expect("load");
        let cb = rb.expect("join").expect("load");
        assert_eq!(ca.min_lines, 5);
        assert_eq!(ca, cb);
    }

    #[tokio::test]
    async fn test_save_round_trip() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = ConfigStore::new();

        let mut config = DryConfig::default();
        config.excluded_pairs.push("class|a/B.java|b/C.java".into());
        store.save(dir.path(), &config).await.expect("save");

        let reloaded = store.refresh(dir.path()).await.expect("reload");
        assert_eq!(reloaded.excluded_pairs, config.excluded_pairs);
    }
}
