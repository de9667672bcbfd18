//! Pipeline orchestrator.
//!
//! Wires together all subsystems into a coherent indexing + reporting
//! engine. This is the top-level public API of dry-core.
//!
//! ## Architecture
//!
//! ```text
//! scanner (walk + ignore + checksum) --> extractor --> store
//!                                                        |
//!                                                        v
//!                                  embedder --> store (vectors)
//!                                                        |
//!                                                        v
//!                                  dedup engine --> DuplicateReport
//! ```
//!
//! One engine drives one repo, and callers must not run two pipelines
//! concurrently against the same repo root.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::config::{self, DryConfig};
use crate::dedup::{
    detect_duplicates, duplication_score, global_cache, DetectOptions, Thresholds,
};
use crate::embedder::{EmbedStats, EmbeddingClient};
use crate::error::{DryError, DryResult};
use crate::ignore_rules::IgnoreMatcher;
use crate::pairs::parse_pair_key;
use crate::scanner;
use crate::store::UnitStore;
use crate::types::{DuplicateReport, IndexUnit, TrackedFile};

/// Subdirectory of the repo holding the index database.
pub const DATA_DIR: &str = ".dry";
/// Subdirectory holding emitted duplicate reports.
pub const REPORTS_DIR: &str = ".dry/reports";

/// Options for a full index build.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Skip the embedding pass; units persist without vectors.
    pub skip_embeddings: bool,
}

/// Result of a full index build.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    /// Files successfully scanned and tracked.
    pub files_indexed: usize,
    /// Files that failed to parse and were skipped.
    pub files_failed: usize,
    /// Units persisted.
    pub units_indexed: usize,
    /// Embedding pass counters.
    pub embed: EmbedStats,
}

/// Result of an incremental index update.
#[derive(Debug, Clone, Default)]
pub struct UpdateStats {
    /// Files seen for the first time.
    pub new_files: usize,
    /// Tracked files whose content changed.
    pub changed_files: usize,
    /// Tracked files that disappeared.
    pub deleted_files: usize,
    /// Tracked files left untouched.
    pub unchanged_files: usize,
    /// Files that failed to parse during re-extraction.
    pub files_failed: usize,
    /// Units persisted for new and changed files.
    pub units_indexed: usize,
    /// Embedding pass counters for affected units.
    pub embed: EmbedStats,
}

/// Result of pruning stale exclusion entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionCleanup {
    /// Entries still matching at least one actual pair.
    pub kept: usize,
    /// Entries removed from the config.
    pub removed: usize,
}

/// The DryScan engine: one instance per repo.
#[derive(Debug)]
pub struct Engine {
    repo_root: PathBuf,
    config: DryConfig,
    store: UnitStore,
    embedder: EmbeddingClient,
}

impl Engine {
    /// Open the engine for a repository root, loading its config and store.
    pub async fn open(repo_path: &Path) -> DryResult<Self> {
        if !repo_path.is_dir() {
            return Err(DryError::PathNotFound { path: repo_path.to_path_buf() });
        }
        let repo_root = std::fs::canonicalize(repo_path)?;
        let config = config::store().get(&repo_root).await?;
        let store = UnitStore::open(&repo_root.join(DATA_DIR).join("index.db"))?;
        let embedder = EmbeddingClient::new(&config);

        tracing::info!(repo = %repo_root.display(), "engine opened");
        Ok(Self { repo_root, config, store, embedder })
    }

    /// Repository root this engine drives.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// The resolved config this engine runs under.
    pub fn config(&self) -> &DryConfig {
        &self.config
    }

    /// Direct access to the persistent store (tests, advanced callers).
    pub fn store(&self) -> &UnitStore {
        &self.store
    }

    /// Full index build: wipe previous state, scan everything, embed.
    pub async fn init(&mut self, options: &InitOptions) -> DryResult<IndexStats> {
        let previous: Vec<String> = self
            .store
            .get_all_files()?
            .into_iter()
            .map(|f| f.file_path)
            .collect();
        if !previous.is_empty() {
            self.store.remove_units_by_file_paths(&previous)?;
            self.store.remove_files_by_file_paths(&previous)?;
            global_cache().invalidate(&previous);
        }

        let matcher = IgnoreMatcher::build(&self.repo_root, &self.config)?;
        let outcome = scanner::scan(&self.repo_root, &self.repo_root, &self.config, &matcher)?;

        self.store.save_units(&outcome.units)?;
        self.store.save_files(&outcome.files)?;

        let mut stats = IndexStats {
            files_indexed: outcome.files.len(),
            files_failed: outcome.failed,
            units_indexed: outcome.units.len(),
            embed: EmbedStats::default(),
        };
        if !options.skip_embeddings {
            stats.embed = self.embed_and_persist(outcome.units).await?;
        }

        tracing::info!(
            files = stats.files_indexed,
            units = stats.units_indexed,
            failed = stats.files_failed,
            embedded = stats.embed.embedded,
            "full index build finished"
        );
        Ok(stats)
    }

    /// Incremental update: detect new/changed/deleted files and reconcile.
    pub async fn update_index(&mut self) -> DryResult<UpdateStats> {
        let matcher = IgnoreMatcher::build(&self.repo_root, &self.config)?;
        let current = scanner::list_source_files(&self.repo_root, &matcher)?;
        let tracked: HashMap<String, TrackedFile> = self
            .store
            .get_all_files()?
            .into_iter()
            .map(|f| (f.file_path.clone(), f))
            .collect();

        let mut stats = UpdateStats::default();
        let mut to_extract: Vec<String> = Vec::new();
        let mut changed: Vec<String> = Vec::new();

        for path in &current {
            match tracked.get(path) {
                None => {
                    stats.new_files += 1;
                    to_extract.push(path.clone());
                }
                Some(row) => {
                    let mtime = scanner::file_mtime_millis(&self.repo_root, path)?;
                    if mtime == row.mtime {
                        stats.unchanged_files += 1;
                        continue;
                    }
                    let checksum = scanner::checksum_file(&self.repo_root, path)?;
                    if checksum == row.checksum {
                        stats.unchanged_files += 1;
                    } else {
                        stats.changed_files += 1;
                        changed.push(path.clone());
                        to_extract.push(path.clone());
                    }
                }
            }
        }

        let current_set: HashSet<&String> = current.iter().collect();
        let deleted: Vec<String> = tracked
            .keys()
            .filter(|p| !current_set.contains(p))
            .cloned()
            .collect();
        stats.deleted_files = deleted.len();

        let mut stale = deleted;
        stale.extend(changed);
        if !stale.is_empty() {
            self.store.remove_units_by_file_paths(&stale)?;
            self.store.remove_files_by_file_paths(&stale)?;
            global_cache().invalidate(&stale);
        }

        if !to_extract.is_empty() {
            let outcome = scanner::scan_rel_files(&self.repo_root, &to_extract, &self.config);
            stats.files_failed = outcome.failed;
            stats.units_indexed = outcome.units.len();
            self.store.save_units(&outcome.units)?;
            self.store.save_files(&outcome.files)?;
            stats.embed = self.embed_and_persist(outcome.units).await?;
        }

        tracing::info!(
            new = stats.new_files,
            changed = stats.changed_files,
            deleted = stats.deleted_files,
            unchanged = stats.unchanged_files,
            "incremental update finished"
        );
        Ok(stats)
    }

    /// Update the index, run duplicate detection, and compose the report.
    pub async fn build_duplicate_report(&mut self) -> DryResult<DuplicateReport> {
        self.update_index().await?;

        let units = self.store.get_all_units()?;
        let options = DetectOptions::from_config(&self.config);
        let duplicates = detect_duplicates(&units, &options, global_cache());
        let score = duplication_score(&units, &duplicates);

        Ok(DuplicateReport {
            version: 1,
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            threshold: self.config.threshold,
            grade: score.grade,
            score,
            duplicates,
        })
    }

    /// Prune configured exclusions that no longer match any actual pair.
    ///
    /// Detection runs with zero thresholds so every comparable pair counts
    /// as "actual", whatever the user's knob is set to.
    pub async fn clean_exclusions(&mut self) -> DryResult<ExclusionCleanup> {
        self.update_index().await?;

        let units = self.store.get_all_units()?;
        let all_pairs = detect_duplicates(
            &units,
            &DetectOptions {
                thresholds: Some(Thresholds::zero()),
                excluded_pairs: Vec::new(),
            },
            global_cache(),
        );

        let mut kept: Vec<String> = Vec::new();
        let mut removed = 0usize;
        for pattern in &self.config.excluded_pairs {
            let still_real = parse_pair_key(pattern).is_some()
                && all_pairs
                    .iter()
                    .any(|g| crate::pairs::pair_key_matches(&g.exclusion_string, pattern));
            if still_real {
                kept.push(pattern.clone());
            } else {
                tracing::info!(pattern = %pattern, "removing stale exclusion");
                removed += 1;
            }
        }

        if removed > 0 {
            self.config.excluded_pairs = kept.clone();
            config::store().save(&self.repo_root, &self.config).await?;
        }

        Ok(ExclusionCleanup { kept: kept.len(), removed })
    }

    /// Exclude the pair named by a short id from the latest report.
    ///
    /// Returns `true` when the exclusion was added, `false` when it was
    /// already present. Unknown short ids surface as an exclusion error.
    pub async fn add_exclusion(&mut self, short_id: &str) -> DryResult<bool> {
        let report = self
            .load_latest_report()?
            .ok_or_else(|| DryError::Exclusion { short_id: short_id.to_string() })?;

        let group = report
            .duplicates
            .iter()
            .find(|g| g.short_id == short_id)
            .ok_or_else(|| DryError::Exclusion { short_id: short_id.to_string() })?;

        if self
            .config
            .excluded_pairs
            .contains(&group.exclusion_string)
        {
            return Ok(false);
        }

        self.config.excluded_pairs.push(group.exclusion_string.clone());
        config::store().save(&self.repo_root, &self.config).await?;
        tracing::info!(pair = %group.exclusion_string, "exclusion added");
        Ok(true)
    }

    /// Directory where report collaborators write their payloads.
    pub fn reports_dir(&self) -> PathBuf {
        self.repo_root.join(REPORTS_DIR)
    }

    /// Load the most recent report from the reports directory, if any.
    ///
    /// Short ids are scoped to the latest report, so exclusion commands
    /// resolve against it and nothing older.
    pub fn load_latest_report(&self) -> DryResult<Option<DuplicateReport>> {
        let dir = self.reports_dir();
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut names: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "json"))
            .collect();
        // Report names embed an ISO timestamp, so name order is time order.
        names.sort();

        let Some(latest) = names.last() else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(latest)?;
        let report: DuplicateReport = serde_json::from_str(&raw)
            .map_err(|e| DryError::Serialization(format!("unreadable report {}: {e}", latest.display())))?;
        Ok(Some(report))
    }

    async fn embed_and_persist(&mut self, units: Vec<IndexUnit>) -> DryResult<EmbedStats> {
        let mut units = units;
        let stats = self.embedder.embed_units(&mut units).await;

        let embedded: Vec<IndexUnit> = units
            .into_iter()
            .filter(|u| u.embedding.is_some())
            .collect();
        if !embedded.is_empty() {
            self.store.update_units(&embedded)?;
        }
        Ok(stats)
    }
}
