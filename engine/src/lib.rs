//! # Investigation engine
//!
//! Builds investigation files from the per-entry records of a structural
//! biology archive. Rows of every entry in a group are denormalized into
//! one in-memory store, then a JSON-declared list of operations derives
//! the investigation categories from it. Missing data never aborts a run:
//! the operation is skipped and recorded.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Entry dumps │────▶│    Store    │────▶│ Interpreter │────▶│   Output    │
//! │ (per entry) │     │  (ingest)   │     │ (operations)│     │ + skip log  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use investigation::{load_entry_file, run_group, OperationList, ReferenceTables};
//!
//! let program = Arc::new(OperationList::from_file("operations.json")?);
//! let entry = load_entry_file("dumps/1abc.json")?;
//! let output = run_group("1abc", &[entry], program, Arc::new(ReferenceTables::new()))?;
//! println!("{}", output.document.to_json()?);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Values, rows and categories
//! - [`store`] - Denormalized store
//! - [`reference`] - Shared reference tables
//! - [`input`] - Entry dumps and grouping manifests
//! - [`transform`] - Operation language, grouping and pipeline
//! - [`output`] - Output projection and run reports
//! - [`validation`] - Operation file schema validation
//! - [`config`] - Environment settings
//! - [`logs`] - Log broadcasting

// Core modules
pub mod error;
pub mod models;
pub mod store;
pub mod reference;

// Input
pub mod input;

// Transformation
pub mod transform;

// Output
pub mod output;

// Validation
pub mod validation;

// Settings and logging
pub mod config;
pub mod logs;

pub use transform::{dsl, pipeline};

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    AcquisitionError, AcquisitionResult, ConfigError, ConfigResult, PipelineError,
    PipelineResult, StoreError, StoreResult,
};

// =============================================================================
// Re-exports - Models and store
// =============================================================================

pub use models::{Category, Cell, Origin, RowId, RowMap, Scalar, SourceId};
pub use store::{DerivedRow, FilterCondition, RowFilter, SelectedRow, Selection, Store};
pub use reference::ReferenceTables;

// =============================================================================
// Re-exports - Input
// =============================================================================

pub use input::{
    load_entries, load_entry_file, parse_manifest, read_manifest, CategoryRows, EntrySource,
    ManifestEntry,
};

// =============================================================================
// Re-exports - Operations
// =============================================================================

pub use transform::dsl::{
    example_operations, execute, operations_description, Interpreter, Operation,
    OperationDocument, OperationKind, OperationList, Phase, SkipRecord, TransformResult,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::grouper::{group_entries, group_manifest, EntryGroup};
pub use transform::pipeline::{
    cancel_flag, run_batch, run_group, run_groups, BatchOptions, CancelFlag, GroupOutcome,
    InvestigationOutput, INVESTIGATION_CATEGORY,
};

// =============================================================================
// Re-exports - Output, validation, settings
// =============================================================================

pub use output::{OutputCategory, OutputDocument, RunReport};
pub use validation::{is_valid_operation_document, validate_operation_document};
pub use config::{EngineConfig, ReferenceSpec};
