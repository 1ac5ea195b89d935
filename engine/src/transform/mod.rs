//! Transformation module.
//!
//! - DSL: Operation file, vocabulary and interpreter
//! - Grouper: Correlated entries to investigations
//! - Pipeline: Invocation and batch runner

pub mod dsl;
pub mod grouper;
pub mod pipeline;

pub use dsl::*;
pub use grouper::{group_entries, group_manifest, EntryGroup};
pub use pipeline::*;
