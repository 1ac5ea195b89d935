//! JSON Schema validation of operation files.
//!
//! The operation file is checked against an embedded JSON Schema
//! (Draft 7) before it is deserialized, so shape errors are reported all
//! at once instead of one serde error at a time.
//! Semantic checks (known kinds, item arity, regex patterns) follow in
//! [`crate::transform::dsl::definition`].
//!
//! # Embedded Schema
//!
//! `schemas/operations.schema.json`, embedded at compile time.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use investigation::validation::validate_operation_document;
//!
//! let doc = json!({
//!     "operations": [{
//!         "operation": "split",
//!         "source_category": "sample",
//!         "source_items": ["comp"],
//!         "target_category": "residue",
//!         "target_items": ["code"]
//!     }]
//! });
//! assert!(validate_operation_document(&doc).is_ok());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

static OPERATION_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/operations.schema.json"))
        .expect("Invalid embedded schema")
});

/// Validate a JSON value against a JSON schema.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with one message per violation
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick check: true/false only.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate an operation file document.
pub fn validate_operation_document(data: &Value) -> Result<(), Vec<String>> {
    validate(&OPERATION_SCHEMA, data)
}

/// Quick check against the operation file schema.
pub fn is_valid_operation_document(data: &Value) -> bool {
    is_valid(&OPERATION_SCHEMA, data)
}
