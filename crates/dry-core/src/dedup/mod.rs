//! Duplicate detection over embedded units.
//!
//! Pairs are formed within each unit-type bucket and scored with weighted
//! cosine similarity: a unit's own embedding blended with the similarity of
//! its ancestors, so a function pair inside similar classes ranks above the
//! same pair in unrelated classes. Thresholds derive from the single user
//! knob; the per-type offsets live here as named constants.

pub mod cache;

use std::collections::HashMap;

use crate::config::DryConfig;
use crate::pairs::{pair_key_for_units, pair_key_matches, short_id};
use crate::types::{DuplicateGroup, DuplicationScore, Grade, IndexUnit, UnitType};
use crate::vector::cosine;

pub use cache::{global_cache, SimilarityCache};

/// Default function-level threshold; the config knob's baseline.
pub const T_FUNCTION_DEFAULT: f64 = 0.88;
/// Default block threshold: slightly laxer than functions.
pub const T_BLOCK_DEFAULT: f64 = 0.86;
/// Default class threshold: stricter than functions.
pub const T_CLASS_DEFAULT: f64 = 0.92;

const W_CLASS_SELF: f64 = 1.0;
const W_FUNCTION_SELF: f64 = 0.85;
const W_FUNCTION_PARENT_CLASS: f64 = 0.15;
const W_BLOCK_SELF: f64 = 0.75;
const W_BLOCK_PARENT_FUNCTION: f64 = 0.15;
const W_BLOCK_PARENT_CLASS: f64 = 0.10;

/// Per-type similarity thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Threshold applied to class pairs.
    pub class: f64,
    /// Threshold applied to function pairs.
    pub function: f64,
    /// Threshold applied to block pairs.
    pub block: f64,
}

impl Thresholds {
    /// Derive all three thresholds from the user's function-level knob.
    ///
    /// Moving the knob shifts class and block thresholds by the same delta,
    /// keeping their default offsets from the function baseline.
    pub fn derive(threshold: f64) -> Self {
        let t = clamp01(threshold);
        Self {
            function: t,
            block: clamp01(t + (T_BLOCK_DEFAULT - T_FUNCTION_DEFAULT)),
            class: clamp01(t + (T_CLASS_DEFAULT - T_FUNCTION_DEFAULT)),
        }
    }

    /// All-zero thresholds: every comparable pair is emitted. Used by
    /// exclusion cleanup to enumerate actual pairs.
    pub fn zero() -> Self {
        Self { class: 0.0, function: 0.0, block: 0.0 }
    }

    fn for_type(&self, unit_type: UnitType) -> f64 {
        match unit_type {
            UnitType::Class => self.class,
            UnitType::Function => self.function,
            UnitType::Block => self.block,
        }
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Inputs controlling one detection pass.
#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    /// Per-type thresholds, usually `Thresholds::derive(config.threshold)`.
    pub thresholds: Option<Thresholds>,
    /// Canonical pair keys to suppress.
    pub excluded_pairs: Vec<String>,
}

impl DetectOptions {
    /// Options matching a config: derived thresholds plus its excludes.
    pub fn from_config(config: &DryConfig) -> Self {
        Self {
            thresholds: Some(Thresholds::derive(config.threshold)),
            excluded_pairs: config.excluded_pairs.clone(),
        }
    }
}

/// Run pairwise duplicate detection over all persisted units.
///
/// Returns groups sorted by descending similarity; equal similarities order
/// by pair key so identical input yields identical output.
pub fn detect_duplicates(
    units: &[IndexUnit],
    options: &DetectOptions,
    cache: &SimilarityCache,
) -> Vec<DuplicateGroup> {
    let thresholds = options
        .thresholds
        .unwrap_or_else(|| Thresholds::derive(T_FUNCTION_DEFAULT));
    let by_id: HashMap<&str, &IndexUnit> =
        units.iter().map(|u| (u.id.as_str(), u)).collect();

    let mut groups = Vec::new();
    for unit_type in [UnitType::Class, UnitType::Function, UnitType::Block] {
        let bucket: Vec<&IndexUnit> =
            units.iter().filter(|u| u.unit_type == unit_type).collect();
        let threshold = thresholds.for_type(unit_type);

        for i in 0..bucket.len() {
            for j in (i + 1)..bucket.len() {
                let (left, right) = (bucket[i], bucket[j]);
                let Some(similarity) = weighted_similarity(left, right, &by_id, cache) else {
                    continue;
                };
                if similarity < threshold {
                    continue;
                }
                let Some(exclusion_string) = pair_key_for_units(left, right) else {
                    continue;
                };
                let id = format!("{}::{}", left.id, right.id);
                groups.push(DuplicateGroup {
                    short_id: short_id(&id),
                    id,
                    similarity,
                    left: left.into(),
                    right: right.into(),
                    exclusion_string,
                });
            }
        }
    }

    groups.retain(|g| {
        !options
            .excluded_pairs
            .iter()
            .any(|pattern| pair_key_matches(&g.exclusion_string, pattern))
    });

    groups.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.exclusion_string.cmp(&b.exclusion_string))
    });

    tracing::debug!(groups = groups.len(), "duplicate detection finished");
    groups
}

/// Weighted similarity for a same-type pair.
///
/// With both embeddings present the result is computed and cached. When
/// either side is unembedded the cached value stands in, keeping stable
/// pairs visible while an incremental update is mid-flight.
fn weighted_similarity(
    left: &IndexUnit,
    right: &IndexUnit,
    by_id: &HashMap<&str, &IndexUnit>,
    cache: &SimilarityCache,
) -> Option<f64> {
    let (Some(le), Some(re)) = (left.embedding.as_deref(), right.embedding.as_deref()) else {
        return cache.get(&left.id, &right.id);
    };

    let base = cosine(le, re);
    let similarity = match left.unit_type {
        UnitType::Class => base * W_CLASS_SELF,
        UnitType::Function => {
            W_FUNCTION_SELF * base
                + W_FUNCTION_PARENT_CLASS
                    * parent_similarity(left, right, UnitType::Class, by_id)
        }
        UnitType::Block => {
            W_BLOCK_SELF * base
                + W_BLOCK_PARENT_FUNCTION
                    * parent_similarity(left, right, UnitType::Function, by_id)
                + W_BLOCK_PARENT_CLASS
                    * parent_similarity(left, right, UnitType::Class, by_id)
        }
    };

    cache.insert(&left.id, &right.id, similarity, &left.file_path, &right.file_path);
    Some(similarity)
}

/// Cosine similarity between the nearest ancestors of the requested type on
/// both sides, or 0 when either side has no such ancestor or it lacks an
/// embedding.
fn parent_similarity(
    left: &IndexUnit,
    right: &IndexUnit,
    target: UnitType,
    by_id: &HashMap<&str, &IndexUnit>,
) -> f64 {
    let la = ancestor_of_type(left, target, by_id).and_then(|u| u.embedding.as_deref());
    let ra = ancestor_of_type(right, target, by_id).and_then(|u| u.embedding.as_deref());
    match (la, ra) {
        (Some(a), Some(b)) => cosine(a, b),
        _ => 0.0,
    }
}

fn ancestor_of_type<'a>(
    unit: &IndexUnit,
    target: UnitType,
    by_id: &HashMap<&str, &'a IndexUnit>,
) -> Option<&'a IndexUnit> {
    let mut current_parent = unit.parent_id.as_deref();
    while let Some(parent_id) = current_parent {
        let parent = by_id.get(parent_id)?;
        if parent.unit_type == target {
            return Some(parent);
        }
        current_parent = parent.parent_id.as_deref();
    }
    None
}

/// Compute the aggregate duplication score over all units and surviving
/// groups.
pub fn duplication_score(units: &[IndexUnit], groups: &[DuplicateGroup]) -> DuplicationScore {
    let total_lines: u64 = units.iter().map(|u| u64::from(u.line_span())).sum();

    let contributions: f64 = groups
        .iter()
        .map(|g| {
            let avg_lines =
                (f64::from(g.left.line_span()) + f64::from(g.right.line_span())) / 2.0;
            g.similarity * avg_lines
        })
        .sum();

    let score = if total_lines == 0 || groups.is_empty() {
        0.0
    } else {
        100.0 * contributions / total_lines as f64
    };

    DuplicationScore {
        score,
        grade: Grade::from_score(score),
        total_lines,
        duplicate_lines: contributions.round() as u64,
        duplicate_groups: groups.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(
        unit_type: UnitType,
        name: &str,
        file_path: &str,
        lines: (u32, u32),
        parent_id: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> IndexUnit {
        IndexUnit {
            id: IndexUnit::derive_id(unit_type, name, lines.0, lines.1),
            name: name.to_string(),
            file_path: file_path.to_string(),
            start_line: lines.0,
            end_line: lines.1,
            code: match unit_type {
                UnitType::Class => format!("class {name} {{ }}"),
                UnitType::Function => format!("int {}(int a, int b) {{ return a + b; }}", name.rsplit('.').next().unwrap_or(name)),
                UnitType::Block => "{ int x = a + b; use(x); }".to_string(),
            },
            unit_type,
            parent_id: parent_id.map(str::to_string),
            embedding,
        }
    }

    /// Two classes, each holding one function with identical embeddings.
    fn sample_units() -> Vec<IndexUnit> {
        let class_a = unit(
            UnitType::Class,
            "Sample",
            "a/Sample.java",
            (0, 7),
            None,
            Some(vec![1.0, 0.0]),
        );
        let class_b = unit(
            UnitType::Class,
            "Other",
            "b/Other.java",
            (0, 7),
            None,
            Some(vec![1.0, 0.0]),
        );
        let fn_a = unit(
            UnitType::Function,
            "Sample.sum",
            "a/Sample.java",
            (2, 6),
            Some(&class_a.id),
            Some(vec![0.0, 1.0]),
        );
        let fn_b = unit(
            UnitType::Function,
            "Other.add",
            "b/Other.java",
            (2, 6),
            Some(&class_b.id),
            Some(vec![0.0, 1.0]),
        );
        vec![class_a, class_b, fn_a, fn_b]
    }

    #[test]
    fn test_threshold_derivation_keeps_offsets() {
        let t = Thresholds::derive(0.88);
        assert!((t.function - 0.88).abs() < 1e-9);
        assert!((t.block - 0.86).abs() < 1e-9);
        assert!((t.class - 0.92).abs() < 1e-9);

        let shifted = Thresholds::derive(0.90);
        assert!((shifted.function - 0.90).abs() < 1e-9);
        assert!((shifted.block - 0.88).abs() < 1e-9);
        assert!((shifted.class - 0.94).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_derivation_clamps() {
        let t = Thresholds::derive(0.99);
        assert!((t.class - 1.0).abs() < 1e-9);
        let low = Thresholds::derive(0.01);
        assert!(low.block >= 0.0);
    }

    #[test]
    fn test_identical_functions_in_identical_classes_are_emitted() {
        let units = sample_units();
        let options = DetectOptions {
            thresholds: Some(Thresholds::derive(0.88)),
            excluded_pairs: Vec::new(),
        };
        let groups = detect_duplicates(&units, &options, &SimilarityCache::new());

        let function_group = groups
            .iter()
            .find(|g| g.left.unit_type == UnitType::Function)
            .expect("function group");
        assert!((function_group.similarity - 1.0).abs() < 1e-9);
        assert_eq!(
            function_group.exclusion_string,
            "function|Other.add(arity:2)|Sample.sum(arity:2)"
        );
        assert!(!function_group.short_id.is_empty());

        // The identical classes clear the stricter class threshold too.
        assert!(groups.iter().any(|g| g.left.unit_type == UnitType::Class));
    }

    #[test]
    fn test_missing_parent_embedding_reduces_function_similarity() {
        let mut units = sample_units();
        // Strip class embeddings: parent similarity drops to 0 and the
        // function pair lands at 0.85, below the 0.88 threshold.
        for u in &mut units {
            if u.unit_type == UnitType::Class {
                u.embedding = None;
            }
        }
        let options = DetectOptions {
            thresholds: Some(Thresholds::derive(0.88)),
            excluded_pairs: Vec::new(),
        };
        let groups = detect_duplicates(&units, &options, &SimilarityCache::new());
        assert!(groups
            .iter()
            .all(|g| g.left.unit_type != UnitType::Function));
    }

    #[test]
    fn test_cache_keeps_pairs_visible_while_unembedded() {
        let cache = SimilarityCache::new();
        let units = sample_units();
        let options = DetectOptions {
            thresholds: Some(Thresholds::derive(0.88)),
            excluded_pairs: Vec::new(),
        };

        let first = detect_duplicates(&units, &options, &cache);
        assert!(!first.is_empty());

        // Drop every embedding: cached similarities keep the report stable.
        let stripped: Vec<IndexUnit> = units
            .iter()
            .cloned()
            .map(|mut u| {
                u.embedding = None;
                u
            })
            .collect();
        let second = detect_duplicates(&stripped, &options, &cache);
        assert_eq!(
            first.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(),
            second.iter().map(|g| g.id.as_str()).collect::<Vec<_>>(),
        );

        // Invalidation by path removes the cached pairs again.
        cache.invalidate(&["a/Sample.java".to_string()]);
        let third = detect_duplicates(&stripped, &options, &cache);
        assert!(third.is_empty());
    }

    #[test]
    fn test_excluded_pairs_are_filtered() {
        let units = sample_units();
        let options = DetectOptions {
            thresholds: Some(Thresholds::derive(0.88)),
            excluded_pairs: vec![
                "function|Other.add(arity:2)|Sample.sum(arity:2)".to_string(),
            ],
        };
        let groups = detect_duplicates(&units, &options, &SimilarityCache::new());
        assert!(groups
            .iter()
            .all(|g| g.left.unit_type != UnitType::Function));
    }

    #[test]
    fn test_class_exclude_globs_match_paths() {
        let units = sample_units();
        let options = DetectOptions {
            thresholds: Some(Thresholds::derive(0.88)),
            excluded_pairs: vec!["class|a/*.java|b/*.java".to_string()],
        };
        let groups = detect_duplicates(&units, &options, &SimilarityCache::new());
        assert!(groups.iter().all(|g| g.left.unit_type != UnitType::Class));
    }

    #[test]
    fn test_equal_similarities_order_by_pair_key() {
        let mut units = sample_units();
        // A second pair of identical functions in the same classes.
        let class_a_id = units[0].id.clone();
        let class_b_id = units[1].id.clone();
        units.push(unit(
            UnitType::Function,
            "Sample.mul",
            "a/Sample.java",
            (10, 14),
            Some(&class_a_id),
            Some(vec![0.6, 0.8]),
        ));
        units.push(unit(
            UnitType::Function,
            "Other.times",
            "b/Other.java",
            (10, 14),
            Some(&class_b_id),
            Some(vec![0.6, 0.8]),
        ));

        let options = DetectOptions {
            thresholds: Some(Thresholds::derive(0.88)),
            excluded_pairs: Vec::new(),
        };
        let groups = detect_duplicates(&units, &options, &SimilarityCache::new());
        let function_keys: Vec<&str> = groups
            .iter()
            .filter(|g| g.left.unit_type == UnitType::Function)
            .map(|g| g.exclusion_string.as_str())
            .collect();

        let mut sorted = function_keys.clone();
        sorted.sort();
        assert_eq!(function_keys, sorted);
    }

    #[test]
    fn test_score_monotonicity() {
        let units = sample_units();
        let options = DetectOptions {
            thresholds: Some(Thresholds::zero()),
            excluded_pairs: Vec::new(),
        };
        let groups = detect_duplicates(&units, &options, &SimilarityCache::new());
        assert!(!groups.is_empty());

        let base = duplication_score(&units, &groups);

        let mut boosted = groups.clone();
        let target = boosted
            .iter_mut()
            .min_by(|a, b| a.similarity.total_cmp(&b.similarity))
            .expect("group");
        target.similarity += 0.05;
        let raised = duplication_score(&units, &boosted);
        assert!(raised.score > base.score);
    }

    #[test]
    fn test_empty_repo_scores_zero_excellent() {
        let score = duplication_score(&[], &[]);
        assert_eq!(score.score, 0.0);
        assert_eq!(score.grade, Grade::Excellent);
        assert_eq!(score.total_lines, 0);
        assert_eq!(score.duplicate_lines, 0);
        assert_eq!(score.duplicate_groups, 0);
    }

    #[test]
    fn test_score_computation_matches_formula() {
        let units = sample_units();
        // total lines: 8 + 8 + 5 + 5 = 26
        let options = DetectOptions {
            thresholds: Some(Thresholds::derive(0.88)),
            excluded_pairs: Vec::new(),
        };
        let groups = detect_duplicates(&units, &options, &SimilarityCache::new());
        let score = duplication_score(&units, &groups);

        let expected: f64 = groups
            .iter()
            .map(|g| {
                g.similarity
                    * (f64::from(g.left.line_span()) + f64::from(g.right.line_span()))
                    / 2.0
            })
            .sum();
        assert_eq!(score.total_lines, 26);
        assert!((score.score - 100.0 * expected / 26.0).abs() < 1e-9);
        assert_eq!(score.duplicate_lines, expected.round() as u64);
    }
}
