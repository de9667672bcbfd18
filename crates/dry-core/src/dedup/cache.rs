//! Process-wide similarity cache.
//!
//! During incremental updates some units are briefly unembedded; without
//! this cache a stable pair would flicker out of the report. Entries record
//! the last-computed weighted similarity plus the file paths of both sides
//! so invalidation can target changed files.

use std::sync::OnceLock;

use dashmap::DashMap;

/// Global cache instance, created lazily on first use.
static CACHE: OnceLock<SimilarityCache> = OnceLock::new();

/// Get the process-wide similarity cache.
pub fn global_cache() -> &'static SimilarityCache {
    CACHE.get_or_init(SimilarityCache::new)
}

#[derive(Debug, Clone)]
struct CachedSimilarity {
    similarity: f64,
    left_path: String,
    right_path: String,
}

/// Cache of pairwise similarities keyed by sorted unit-id pairs.
#[derive(Debug, Default)]
pub struct SimilarityCache {
    entries: DashMap<(String, String), CachedSimilarity>,
}

impl SimilarityCache {
    /// Create an empty cache. Library consumers normally use
    /// [`global_cache()`]; owning an instance keeps tests hermetic.
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    fn key(left_id: &str, right_id: &str) -> (String, String) {
        if left_id <= right_id {
            (left_id.to_string(), right_id.to_string())
        } else {
            (right_id.to_string(), left_id.to_string())
        }
    }

    /// Look up the last-computed similarity for a pair, either order.
    pub fn get(&self, left_id: &str, right_id: &str) -> Option<f64> {
        self.entries
            .get(&Self::key(left_id, right_id))
            .map(|e| e.similarity)
    }

    /// Record a computed similarity and the file paths of both sides.
    pub fn insert(
        &self,
        left_id: &str,
        right_id: &str,
        similarity: f64,
        left_path: &str,
        right_path: &str,
    ) {
        self.entries.insert(
            Self::key(left_id, right_id),
            CachedSimilarity {
                similarity,
                left_path: left_path.to_string(),
                right_path: right_path.to_string(),
            },
        );
    }

    /// Drop every entry whose recorded file paths intersect `paths`.
    pub fn invalidate(&self, paths: &[String]) {
        if paths.is_empty() {
            return;
        }
        self.entries.retain(|_, entry| {
            !paths.iter().any(|p| p == &entry.left_path || p == &entry.right_path)
        });
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_order_insensitive() {
        let cache = SimilarityCache::new();
        cache.insert("b", "a", 0.91, "src/B.java", "src/A.java");
        assert_eq!(cache.get("a", "b"), Some(0.91));
        assert_eq!(cache.get("b", "a"), Some(0.91));
    }

    #[test]
    fn test_invalidate_by_intersecting_path() {
        let cache = SimilarityCache::new();
        cache.insert("a", "b", 0.9, "src/A.java", "src/B.java");
        cache.insert("c", "d", 0.8, "src/C.java", "src/D.java");

        cache.invalidate(&["src/B.java".to_string()]);
        assert_eq!(cache.get("a", "b"), None);
        assert_eq!(cache.get("c", "d"), Some(0.8));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_with_no_paths_is_a_no_op() {
        let cache = SimilarityCache::new();
        cache.insert("a", "b", 0.9, "src/A.java", "src/B.java");
        cache.invalidate(&[]);
        assert_eq!(cache.len(), 1);
    }
}
