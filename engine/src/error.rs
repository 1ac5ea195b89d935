//! Error types for the investigation engine.
//!
//! The hierarchy follows the failure policy of the engine:
//!
//! - [`StoreError`] - Denormalized store contract violations
//! - [`ConfigError`] - Operation file problems (fatal, detected at load)
//! - [`AcquisitionError`] - Reading entry dumps, manifests and reference tables
//! - [`PipelineError`] - Top-level invocation errors
//!
//! Missing data is never an error: the interpreter records a
//! [`SkipRecord`](crate::transform::dsl::SkipRecord) instead.
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;

use thiserror::Error;

use crate::transform::dsl::executor::Phase;

// =============================================================================
// Store Errors
// =============================================================================

/// Errors raised by the denormalized store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A category with this name is already registered.
    #[error("Category '{0}' already exists")]
    DuplicateCategory(String),

    /// A row carries an item the category schema does not declare.
    #[error("Item '{item}' is not declared in category '{category}'")]
    SchemaMismatch { category: String, item: String },

    /// The category does not exist.
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    /// Ingested and reference categories cannot be modified in place.
    #[error("Category '{0}' holds ingested rows and cannot be modified in place")]
    ReadOnlyCategory(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors in the operation file. Always fatal to the invocation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the operation file.
    #[error("Failed to read operation file: {0}")]
    Io(#[from] std::io::Error),

    /// Operation file is not valid JSON or does not deserialize.
    #[error("Operation file JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation file does not match the document schema.
    #[error("Operation file is malformed: {}", errors.join("; "))]
    Schema { errors: Vec<String> },

    /// `operation` names a kind outside the fixed vocabulary.
    #[error("Operation #{index}: unknown operation kind '{name}'")]
    UnknownOperation { index: usize, name: String },

    /// Operation is well-formed JSON but inconsistent for its kind.
    #[error("Operation #{index} ({kind}): {message}")]
    InvalidOperation {
        index: usize,
        kind: String,
        message: String,
    },

    /// A `matches` filter does not compile.
    #[error("Operation #{index}: invalid filter pattern: {source}")]
    InvalidPattern {
        index: usize,
        #[source]
        source: regex::Error,
    },

    /// Environment or command-line setting has an invalid value.
    #[error("Invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },
}

// =============================================================================
// Acquisition Errors
// =============================================================================

/// Errors while acquiring input rows.
///
/// The engine only needs to know that an entry could not be acquired;
/// such an entry is never transformed.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Failed to read a file.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry dump is not valid JSON or has a non-scalar value.
    #[error("Invalid entry dump: {0}")]
    Json(#[from] serde_json::Error),

    /// Manifest or reference table is not valid CSV.
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    /// An entry listed in a manifest has no dump.
    #[error("No rows found for entry '{0}'")]
    MissingEntry(String),

    /// Reference record with more fields than the header.
    #[error("Table '{table}' line {line}: {fields} fields, header has {expected}")]
    ExtraFields {
        table: String,
        line: u64,
        fields: usize,
        expected: usize,
    },

    /// CSV without a header row.
    #[error("CSV file {} has no header row", .0.display())]
    NoHeaders(PathBuf),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level invocation errors.
///
/// Returned by [`crate::transform::pipeline::run_group`]. A failed group
/// never affects other groups of a batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Operation file error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Store contract violated while building.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An entry of the group could not be acquired.
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// Interpreter driven out of order.
    #[error("Interpreter is {actual:?}, expected {expected:?}")]
    Phase { expected: Phase, actual: Phase },

    /// Investigation id unusable as an output file name.
    #[error("Invalid investigation id '{0}': must be a plain file name")]
    InvalidId(String),

    /// Group without any entry.
    #[error("Group '{0}' has no entries")]
    EmptyInput(String),

    /// Worker task panicked or was aborted.
    #[error("Worker failed: {0}")]
    Worker(String),

    /// Failed to write output.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for input acquisition.
pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
