//! Operation vocabulary.
//!
//! The set of operation kinds is closed: an operation file naming any
//! other kind is rejected when it is loaded, before any row is ingested.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Cell, Scalar};
use crate::store::RowFilter;

/// All available operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Copy source items to target items row-for-row
    DirectTransfer,

    /// Join several source items of a row into one target item
    Concatenate,

    /// Explode a delimiter-separated value into one target row per segment
    Split,

    /// One target row per distinct key tuple
    DistinctGroup,

    /// Enrich rows from a second category or reference table
    Lookup,

    /// Substitute a literal for null values
    DefaultFill,

    /// Append one row of literals
    StaticValue,

    /// Number the rows of a target category
    AutoIncrement,

    /// Placeholder, does nothing
    Noop,
}

impl OperationKind {
    pub const ALL: [OperationKind; 9] = [
        OperationKind::DirectTransfer,
        OperationKind::Concatenate,
        OperationKind::Split,
        OperationKind::DistinctGroup,
        OperationKind::Lookup,
        OperationKind::DefaultFill,
        OperationKind::StaticValue,
        OperationKind::AutoIncrement,
        OperationKind::Noop,
    ];

    /// Name used in operation files.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::DirectTransfer => "direct_transfer",
            OperationKind::Concatenate => "concatenate",
            OperationKind::Split => "split",
            OperationKind::DistinctGroup => "distinct_group",
            OperationKind::Lookup => "lookup",
            OperationKind::DefaultFill => "default_fill",
            OperationKind::StaticValue => "static_value",
            OperationKind::AutoIncrement => "auto_increment",
            OperationKind::Noop => "noop",
        }
    }

    /// Parse an operation file name. `None` for unknown kinds.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Whether the kind reads rows of a source category.
    pub fn reads_source(self) -> bool {
        !matches!(
            self,
            OperationKind::StaticValue | OperationKind::AutoIncrement | OperationKind::Noop
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific, validated parameters of an operation.
#[derive(Debug, Clone)]
pub enum Step {
    DirectTransfer,
    Concatenate {
        delimiter: String,
    },
    Split {
        delimiter: String,
    },
    DistinctGroup {
        /// Positions in `source_items` forming the group key
        group_by: Vec<usize>,
    },
    Lookup {
        lookup_category: String,
        /// Source item holding the key
        join_key: String,
        /// Item of the lookup category compared with the key
        lookup_key: String,
        /// Items of the lookup category copied after the source items
        lookup_items: Vec<String>,
    },
    DefaultFill {
        value: Scalar,
    },
    StaticValue {
        values: Vec<Cell>,
    },
    AutoIncrement {
        /// Target items whose value restarts the counter
        group_by: Vec<String>,
    },
    Noop,
}

impl Step {
    pub fn kind(&self) -> OperationKind {
        match self {
            Step::DirectTransfer => OperationKind::DirectTransfer,
            Step::Concatenate { .. } => OperationKind::Concatenate,
            Step::Split { .. } => OperationKind::Split,
            Step::DistinctGroup { .. } => OperationKind::DistinctGroup,
            Step::Lookup { .. } => OperationKind::Lookup,
            Step::DefaultFill { .. } => OperationKind::DefaultFill,
            Step::StaticValue { .. } => OperationKind::StaticValue,
            Step::AutoIncrement { .. } => OperationKind::AutoIncrement,
            Step::Noop => OperationKind::Noop,
        }
    }
}

/// A validated operation, ready to execute.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Position in the operation file
    pub index: usize,
    pub step: Step,
    pub source_category: String,
    pub source_items: Vec<String>,
    pub target_category: String,
    pub target_items: Vec<String>,
    /// Narrows the source rows
    pub filter: Option<RowFilter>,
    /// Set semantics when writing the target
    pub distinct: bool,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        self.step.kind()
    }

    /// One-line description for logs.
    pub fn describe(&self) -> String {
        if self.kind().reads_source() {
            format!(
                "#{} {}: {}.[{}] → {}.[{}]",
                self.index,
                self.kind(),
                self.source_category,
                self.source_items.join(", "),
                self.target_category,
                self.target_items.join(", ")
            )
        } else {
            format!(
                "#{} {}: {}.[{}]",
                self.index,
                self.kind(),
                self.target_category,
                self.target_items.join(", ")
            )
        }
    }
}

/// Non-empty, trimmed segments of a delimiter-separated value.
pub fn split_segments<'a>(value: &'a str, delimiter: &str) -> Vec<&'a str> {
    value
        .split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Join values with a delimiter, nulls rendering as empty strings.
/// `None` when every value is null.
pub fn concatenate(values: &[Option<&Scalar>], delimiter: &str) -> Option<String> {
    if values.iter().all(|v| v.is_none()) {
        return None;
    }
    let parts: Vec<_> = values
        .iter()
        .map(|v| v.map(|s| s.render()).unwrap_or_default())
        .collect();
    Some(parts.join(delimiter))
}

/// Get a description of all operation kinds
pub fn operations_description() -> String {
    r#"Available operations:

| Operation | Description | Parameters |
|-----------|-------------|------------|
| direct_transfer | Copy source items to target items, row for row | filter, distinct |
| concatenate | Join source items into the single target item; all-null rows are skipped | delimiter (default " "), filter, distinct |
| split | One target row per segment of the first source item; other source items are carried | delimiter (default " "), filter, distinct |
| distinct_group | One target row per distinct key, first-seen values for other items | group_by (default: all source items), filter |
| lookup | Target items = source items + lookup_items of the matching row (null when no match) | lookup_category, join_key, lookup_key, lookup_items, filter, distinct |
| default_fill | Write value where the source item is null (in place when source = target) | value, filter, distinct |
| static_value | Append one row of literals | value or values, distinct |
| auto_increment | Number target rows 1..n, optionally per group | group_by |
| noop | Do nothing | - |

Filters: {"item": "type", "equals": "polymer"} | {"item": "id", "matches": "^[0-9]+$"} | {"item": "x", "is_null": true}

Example operation:
{
  "operation": "split",
  "source_category": "sample",
  "source_items": ["comp", "id"],
  "target_category": "residue",
  "target_items": ["code", "sample_id"],
  "parameters": {"delimiter": " ", "distinct": true}
}"#
    .to_string()
}
