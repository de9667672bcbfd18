//! Unit extraction driver.
//!
//! Enumerates supported source files under a root, applies the ignore
//! matcher, checksums file content, and dispatches to the matching language
//! extractor. Extraction is CPU-bound and fans out across files with rayon.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use rayon::prelude::*;

use crate::config::DryConfig;
use crate::error::{DryError, DryResult};
use crate::extractor::registry::global_registry;
use crate::ignore_rules::IgnoreMatcher;
use crate::types::{IndexUnit, TrackedFile};

/// Aggregated output of a scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// All extracted units, repo-relative paths.
    pub units: Vec<IndexUnit>,
    /// Tracking rows for every successfully scanned file.
    pub files: Vec<TrackedFile>,
    /// Count of files that failed to parse and were skipped.
    pub failed: usize,
}

/// Scan a target path, which may be a single file or a directory.
///
/// Directories are walked recursively with the ignore matcher applied; files
/// short-circuit the walk. Targeting an unsupported file is an error, while
/// unsupported files inside a directory are silently skipped.
pub fn scan(
    repo_root: &Path,
    target: &Path,
    config: &DryConfig,
    matcher: &IgnoreMatcher,
) -> DryResult<ScanOutcome> {
    if !target.exists() {
        return Err(DryError::PathNotFound { path: target.to_path_buf() });
    }

    if target.is_file() {
        if !global_registry().is_supported(target) {
            return Err(DryError::Unsupported { path: target.to_path_buf() });
        }
        let rel = rel_path_str(repo_root, target);
        let (units, tracked) = scan_one(repo_root, &rel, config)?;
        return Ok(ScanOutcome { units, files: vec![tracked], failed: 0 });
    }

    let rel_files = list_source_files(repo_root, matcher)?;
    Ok(scan_rel_files(repo_root, &rel_files, config))
}

/// Enumerate supported, non-ignored source files under the repo root.
///
/// Returns repo-relative POSIX paths in sorted order.
pub fn list_source_files(repo_root: &Path, matcher: &IgnoreMatcher) -> DryResult<Vec<String>> {
    if !repo_root.exists() {
        return Err(DryError::PathNotFound { path: repo_root.to_path_buf() });
    }

    let registry = global_registry();
    let mut files = Vec::new();

    let walker = WalkBuilder::new(repo_root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    for entry in walker.flatten() {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if !registry.is_supported(path) {
            continue;
        }
        let rel = rel_path_str(repo_root, path);
        if matcher.matches(&rel, false) {
            continue;
        }
        files.push(rel);
    }

    files.sort();
    Ok(files)
}

/// Extract the given repo-relative files, skipping and counting failures.
pub fn scan_rel_files(repo_root: &Path, rel_files: &[String], config: &DryConfig) -> ScanOutcome {
    let results: Vec<Result<(Vec<IndexUnit>, TrackedFile), String>> = rel_files
        .par_iter()
        .map(|rel| {
            scan_one(repo_root, rel, config).map_err(|e| {
                tracing::warn!(file = %rel, error = %e, "skipping file that failed to scan");
                rel.clone()
            })
        })
        .collect();

    let mut outcome = ScanOutcome::default();
    for result in results {
        match result {
            Ok((units, tracked)) => {
                outcome.units.extend(units);
                outcome.files.push(tracked);
            }
            Err(_) => outcome.failed += 1,
        }
    }
    outcome
}

/// Checksum a file's current content (MD5 hex digest).
pub fn checksum_file(repo_root: &Path, rel_path: &str) -> DryResult<String> {
    let bytes = std::fs::read(repo_root.join(rel_path))?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

/// Read a file's modification time in milliseconds since the Unix epoch.
pub fn file_mtime_millis(repo_root: &Path, rel_path: &str) -> DryResult<i64> {
    let metadata = std::fs::metadata(repo_root.join(rel_path))?;
    let modified = metadata.modified()?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(millis)
}

fn scan_one(
    repo_root: &Path,
    rel_path: &str,
    config: &DryConfig,
) -> DryResult<(Vec<IndexUnit>, TrackedFile)> {
    let abs = repo_root.join(rel_path);
    let bytes = std::fs::read(&abs)?;
    let checksum = format!("{:x}", md5::compute(&bytes));
    let source = String::from_utf8(bytes).map_err(|e| DryError::Extract {
        path: abs.clone(),
        message: format!("not valid UTF-8: {e}"),
    })?;

    let extractor = global_registry()
        .for_path(&abs)
        .ok_or_else(|| DryError::Unsupported { path: abs.clone() })?;

    let units = extractor.extract_from_text(rel_path, &source, config)?;
    let tracked = TrackedFile {
        file_path: rel_path.to_string(),
        checksum,
        mtime: file_mtime_millis(repo_root, rel_path)?,
    };

    tracing::debug!(file = %rel_path, units = units.len(), "file scanned");
    Ok((units, tracked))
}

fn rel_path_str(repo_root: &Path, path: &Path) -> String {
    let rel: PathBuf = path
        .strip_prefix(repo_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf());
    rel.to_string_lossy().replace('\\', "/")
}
