//! Core domain types shared across all dry-core subsystems.
//!
//! These types form the API contract between modules. Changing them requires
//! updating all consumers, so they should be stable and minimal.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Unit types
// ---------------------------------------------------------------------------

/// The kind of code region a unit represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    /// Class, interface, or record declaration.
    Class,
    /// Function, method, or constructor.
    Function,
    /// A statement block nested inside a function body.
    Block,
}

impl UnitType {
    /// Convert to the canonical lowercase string used in ids and pair keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Block => "block",
        }
    }

    /// Parse from a canonical string. Returns `None` for unknown input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(Self::Class),
            "function" => Some(Self::Function),
            "block" => Some(Self::Block),
            _ => None,
        }
    }
}

impl std::fmt::Display for UnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named region of a source file extracted by a language extractor.
///
/// Ids are stable across runs for unchanged code:
/// `"{type}:{qualified_name}:{startLine}-{endLine}"` with 0-based rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexUnit {
    /// Stable derived id, unique per repo.
    pub id: String,
    /// Qualified name; functions inside classes read `Class.method`.
    pub name: String,
    /// Repo-relative, POSIX-normalized path of the owning file.
    pub file_path: String,
    /// Starting row (0-based).
    pub start_line: u32,
    /// Ending row (0-based, inclusive).
    pub end_line: u32,
    /// Verbatim source slice. For classes, member-function bodies are
    /// replaced by `{ }` so the class code represents shape only.
    pub code: String,
    /// What kind of region this is.
    pub unit_type: UnitType,
    /// Id of the enclosing unit, if any. A block's parent is a function; a
    /// function's parent (if any) is a class.
    pub parent_id: Option<String>,
    /// Dense embedding vector, attached after extraction.
    pub embedding: Option<Vec<f32>>,
}

impl IndexUnit {
    /// Build the stable id for a unit.
    pub fn derive_id(unit_type: UnitType, name: &str, start_line: u32, end_line: u32) -> String {
        format!("{}:{}:{}-{}", unit_type.as_str(), name, start_line, end_line)
    }

    /// Number of source rows this unit spans.
    pub fn line_span(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// A scanned file tracked for change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    /// Repo-relative, POSIX-normalized path. Primary key.
    pub file_path: String,
    /// MD5 hex digest of the file content at scan time.
    pub checksum: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// An `IndexUnit` without its embedding, as carried inside reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSummary {
    /// Stable unit id.
    pub id: String,
    /// Qualified name.
    pub name: String,
    /// Repo-relative path.
    pub file_path: String,
    /// Starting row (0-based).
    pub start_line: u32,
    /// Ending row (0-based, inclusive).
    pub end_line: u32,
    /// Source slice of the unit.
    pub code: String,
    /// What kind of region this is.
    pub unit_type: UnitType,
    /// Id of the enclosing unit, if any.
    pub parent_id: Option<String>,
}

impl From<&IndexUnit> for UnitSummary {
    fn from(unit: &IndexUnit) -> Self {
        Self {
            id: unit.id.clone(),
            name: unit.name.clone(),
            file_path: unit.file_path.clone(),
            start_line: unit.start_line,
            end_line: unit.end_line,
            code: unit.code.clone(),
            unit_type: unit.unit_type,
            parent_id: unit.parent_id.clone(),
        }
    }
}

impl UnitSummary {
    /// Number of source rows this unit spans.
    pub fn line_span(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// A pair of units flagged as near-duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    /// `"{leftUnitId}::{rightUnitId}"`.
    pub id: String,
    /// Weighted cosine similarity in [0, 1].
    pub similarity: f64,
    /// First unit of the pair.
    pub left: UnitSummary,
    /// Second unit of the pair.
    pub right: UnitSummary,
    /// Opaque per-report identifier users reference in exclusion commands.
    pub short_id: String,
    /// Canonical pair key suitable for `excludedPairs`.
    pub exclusion_string: String,
}

/// Letter grade derived from the duplication score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    /// Score below 5.
    Excellent,
    /// Score in [5, 15).
    Good,
    /// Score in [15, 30).
    Fair,
    /// Score in [30, 50).
    Poor,
    /// Score of 50 or above.
    Critical,
}

impl Grade {
    /// Bucket a duplication score into a grade.
    pub fn from_score(score: f64) -> Self {
        if score < 5.0 {
            Self::Excellent
        } else if score < 15.0 {
            Self::Good
        } else if score < 30.0 {
            Self::Fair
        } else if score < 50.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }
}

/// Aggregate duplication metric over a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicationScore {
    /// Weighted percentage of lines participating in similar pairs.
    pub score: f64,
    /// Grade bucket for `score`.
    pub grade: Grade,
    /// Total line span over all indexed units.
    pub total_lines: u64,
    /// Rounded sum of similarity-weighted average pair spans.
    pub duplicate_lines: u64,
    /// Number of surviving duplicate groups.
    pub duplicate_groups: usize,
}

/// The complete duplicate report emitted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    /// Report schema version.
    pub version: u32,
    /// ISO-8601 UTC timestamp of report generation.
    pub generated_at: String,
    /// The configured function-level threshold the run used.
    pub threshold: f64,
    /// Grade bucket, duplicated from `score` for quick consumption.
    pub grade: Grade,
    /// Aggregate score details.
    pub score: DuplicationScore,
    /// Duplicate groups, sorted by descending similarity.
    pub duplicates: Vec<DuplicateGroup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_type_round_trip() {
        for t in [UnitType::Class, UnitType::Function, UnitType::Block] {
            assert_eq!(UnitType::parse(t.as_str()), Some(t));
        }
        assert_eq!(UnitType::parse("module"), None);
    }

    #[test]
    fn test_derive_id_format() {
        let id = IndexUnit::derive_id(UnitType::Function, "Sample.sum", 4, 9);
        assert_eq!(id, "function:Sample.sum:4-9");
    }

    #[test]
    fn test_grade_buckets() {
        assert_eq!(Grade::from_score(0.0), Grade::Excellent);
        assert_eq!(Grade::from_score(4.999), Grade::Excellent);
        assert_eq!(Grade::from_score(5.0), Grade::Good);
        assert_eq!(Grade::from_score(14.999), Grade::Good);
        assert_eq!(Grade::from_score(15.0), Grade::Fair);
        assert_eq!(Grade::from_score(29.999), Grade::Fair);
        assert_eq!(Grade::from_score(30.0), Grade::Poor);
        assert_eq!(Grade::from_score(49.999), Grade::Poor);
        assert_eq!(Grade::from_score(50.0), Grade::Critical);
        assert_eq!(Grade::from_score(130.0), Grade::Critical);
    }

    #[test]
    fn test_report_json_is_camel_case() {
        let summary = UnitSummary {
            id: "function:A.f:0-4".into(),
            name: "A.f".into(),
            file_path: "src/A.java".into(),
            start_line: 0,
            end_line: 4,
            code: "void f() {}".into(),
            unit_type: UnitType::Function,
            parent_id: None,
        };
        let json = serde_json::to_value(&summary).expect("serialize");
        assert!(json.get("filePath").is_some());
        assert!(json.get("startLine").is_some());
        assert!(json.get("unitType").is_some());
        assert_eq!(json["unitType"], "function");
    }
}
