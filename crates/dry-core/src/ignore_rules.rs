//! Gitignore-aware path exclusion.
//!
//! Composes three rule sources into a single predicate, in order of
//! increasing precedence:
//!
//! 1. built-in defaults (`.git/**`, `.dry/**`)
//! 2. every `.gitignore` found under the repo, each scoped to the directory
//!    containing it (negations preserved)
//! 3. `config.excludedPaths`
//!
//! Matching is evaluated against repo-relative, POSIX-normalized paths with
//! any leading `./` stripped.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;

use crate::config::DryConfig;
use crate::error::{DryError, DryResult};

/// Rules applied before any user input.
const DEFAULT_RULES: &[&str] = &[".git/**", ".dry/**"];

/// Path-exclusion predicate for a single repo.
pub struct IgnoreMatcher {
    gitignore: Gitignore,
}

impl IgnoreMatcher {
    /// Build the matcher for a repo root under the given config.
    pub fn build(repo_root: &Path, config: &DryConfig) -> DryResult<Self> {
        let mut builder = GitignoreBuilder::new(repo_root);

        for rule in DEFAULT_RULES {
            add_root_rule(&mut builder, rule)?;
        }

        // `GitignoreBuilder::add` scopes each file's rules to the directory
        // containing it, which is exactly gitignore semantics.
        for gitignore_path in find_gitignore_files(repo_root) {
            if let Some(err) = builder.add(&gitignore_path) {
                tracing::warn!(
                    path = %gitignore_path.display(),
                    error = %err,
                    "skipping unreadable .gitignore"
                );
            }
        }

        for rule in &config.excluded_paths {
            add_root_rule(&mut builder, rule)?;
        }

        let gitignore = builder.build().map_err(|e| DryError::Config {
            details: format!("invalid ignore rules: {e}"),
        })?;

        Ok(Self { gitignore })
    }

    /// Whether a repo-relative path is excluded from scanning.
    pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        let normalized = rel_path.replace('\\', "/");
        let trimmed = normalized.strip_prefix("./").unwrap_or(&normalized);
        self.gitignore
            .matched_path_or_any_parents(trimmed, is_dir)
            .is_ignore()
    }
}

fn add_root_rule(builder: &mut GitignoreBuilder, rule: &str) -> DryResult<()> {
    builder.add_line(None, rule).map_err(|e| DryError::Config {
        details: format!("invalid exclusion glob {rule:?}: {e}"),
    })?;
    Ok(())
}

/// Collect every `.gitignore` under the repo root.
///
/// The walk itself runs unfiltered (apart from `.git`) so that rules in
/// nested files are honored no matter where they live.
fn find_gitignore_files(repo_root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
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
        if entry.file_type().is_some_and(|t| t.is_file())
            && entry.file_name() == ".gitignore"
        {
            found.push(entry.into_path());
        }
    }

    found.sort();
    found
}
