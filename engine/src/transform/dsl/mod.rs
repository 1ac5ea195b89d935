//! Operation language for building investigation categories.
//!
//! This module provides:
//! - `definition`: The operation file (what a facility configures)
//! - `operations`: The closed vocabulary of operation kinds
//! - `executor`: Execute an operation list against a store
//!
//! ## Usage Flow
//!
//! ```text
//! entry dumps → Interpreter::ingest → Interpreter::transform → finalized Store + SkipRecords
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use investigation::dsl::{Interpreter, OperationList};
//! use investigation::input::load_entry_file;
//! use investigation::reference::ReferenceTables;
//!
//! // 1. Load operations (fails on unknown kinds before any data is read)
//! let program = Arc::new(OperationList::from_file("operations.json")?);
//!
//! // 2. Build the store from every entry of the group
//! let mut interpreter = Interpreter::new(program, Arc::new(ReferenceTables::new()));
//! interpreter.ingest(&load_entry_file("dumps/1abc.json")?)?;
//!
//! // 3. Run operations
//! let result = interpreter.transform()?;
//! for skip in &result.skipped {
//!     println!("#{} {}: {}", skip.operation_index, skip.operation, skip.reason);
//! }
//! ```

pub mod definition;
pub mod executor;
pub mod operations;

// Re-exports for convenience
pub use definition::{
    example_operations, FilterSpec, OperationDocument, OperationList, OperationParameters,
    OperationSpec,
};
pub use executor::{execute, Interpreter, Phase, SkipRecord, TransformResult};
pub use operations::{operations_description, Operation, OperationKind, Step};
