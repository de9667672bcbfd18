//! Error types for dry-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on the
//! subsystem that failed. Variants are split by recoverability: extraction
//! and embedding failures are aggregated per run, everything else aborts the
//! invocation.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all dry-core operations.
#[derive(Debug, Error)]
pub enum DryError {
    // ---- Fatal to the invocation ----
    /// Configuration is malformed, wrongly typed, or numerically invalid.
    #[error("configuration error: {details}")]
    Config {
        /// What's wrong with the config.
        details: String,
    },

    /// A targeted path does not exist.
    #[error("Path not found: {path}")]
    PathNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// An explicitly targeted file has no registered extractor.
    #[error("unsupported file type: {path}")]
    Unsupported {
        /// Path of the unsupported file.
        path: PathBuf,
    },

    // ---- Recoverable (aggregated, run continues) ----
    /// A single file failed to parse. The rest of the index is fine.
    #[error("extraction error for {path}: {message}")]
    Extract {
        /// Path of the file that failed to parse.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Embedding failed for a unit after retries. The unit stays unembedded.
    #[error("embedding error for unit {unit_id}: {message}")]
    Embed {
        /// Id of the unit that failed to embed.
        unit_id: String,
        /// Human-readable error description.
        message: String,
    },

    /// An unknown duplicate-group id was supplied to an exclusion API.
    #[error("unknown duplicate group: {short_id}")]
    Exclusion {
        /// The short id that did not resolve against the latest report.
        short_id: String,
    },

    // ---- Wrapped external errors ----
    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results in dry-core.
pub type DryResult<T> = Result<T, DryError>;
