//! Unit extraction subsystem using tree-sitter.
//!
//! Each supported language registers an extractor that maps syntax-tree
//! nodes to [`IndexUnit`]s. Extraction produces a flat list of class,
//! function, and block units with parent links; triviality filters drop
//! accessor-style functions and undersized units before they are emitted.
//!
//! ## Architecture
//!
//! ```text
//! Source File -> Extension Lookup -> tree-sitter Grammar
//!            -> Parse -> CST
//!            -> Unit Extraction -> Vec<IndexUnit>
//! ```
//!
//! Extractors are stateless apart from a per-file call cache so that call
//! extraction after a scan never reparses.

pub mod languages;
pub mod registry;

use std::path::Path;

use crate::config::DryConfig;
use crate::error::DryResult;
use crate::types::IndexUnit;

/// Hard lower bound on block line spans, combined with
/// `config.minBlockLines` via `max`. Prevents one-line `{ }` noise even
/// under an aggressive config.
pub const BLOCK_LINE_FLOOR: u32 = 3;

/// Trait that each language extractor must implement.
pub trait LanguageExtractor: Send + Sync {
    /// Language identifier (e.g., "java").
    fn language_id(&self) -> &'static str;

    /// File extensions (without dot) this extractor handles.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether this extractor handles the given path.
    fn supports(&self, file_path: &Path) -> bool {
        file_path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions().contains(&ext))
    }

    /// Parse `source` and return all units the skip policies admit.
    ///
    /// `file_path` is the repo-relative path recorded on each unit.
    fn extract_from_text(
        &self,
        file_path: &str,
        source: &str,
        config: &DryConfig,
    ) -> DryResult<Vec<IndexUnit>>;

    /// Names of functions called inside a previously extracted unit.
    ///
    /// Served from the per-file parse cache populated by
    /// `extract_from_text`; returns empty for unknown files or units rather
    /// than reparsing.
    fn extract_calls_from_unit(&self, file_path: &str, unit_id: &str) -> Vec<String>;
}

/// Names used by the triviality filter for accessor-style functions.
pub(crate) fn is_trivial_accessor(short_name: &str) -> bool {
    use regex::Regex;
    use std::sync::OnceLock;

    static ACCESSOR_RE: OnceLock<Regex> = OnceLock::new();
    let re = ACCESSOR_RE
        .get_or_init(|| Regex::new(r"^(?:get|is|set)[A-Z]").expect("static accessor pattern"));
    re.is_match(short_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_names() {
        assert!(is_trivial_accessor("getName"));
        assert!(is_trivial_accessor("isActive"));
        assert!(is_trivial_accessor("setName"));
        assert!(!is_trivial_accessor("getter"));
        assert!(!is_trivial_accessor("issue"));
        assert!(!is_trivial_accessor("settle"));
        assert!(!is_trivial_accessor("compute"));
    }
}
