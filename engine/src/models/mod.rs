//! Record model shared by the store, the interpreter and the output projection.
//!
//! - [`Scalar`] - A non-null item value (text or number)
//! - [`Cell`] - An item value that may be null
//! - [`Category`] - A named table with an ordered item schema and rows
//! - [`SourceId`] / [`RowId`] - Denormalization keys

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Values
// =============================================================================

/// A non-null scalar item value.
///
/// Deserializes from a JSON number or string. Structural files are text
/// based, so values compare by their rendered text (see [`Scalar::render`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Real(f64),
    Text(String),
}

/// An item value; `None` is null / absent.
pub type Cell = Option<Scalar>;

/// One input row: item name to value.
pub type RowMap = BTreeMap<String, Cell>;

impl Scalar {
    /// Create a text value.
    pub fn text(value: impl Into<String>) -> Self {
        Scalar::Text(value.into())
    }

    /// Render as text, the form used for joins, grouping and splitting.
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Scalar::Text(s) => Cow::Borrowed(s.as_str()),
            Scalar::Integer(n) => Cow::Owned(n.to_string()),
            Scalar::Real(f) => Cow::Owned(f.to_string()),
        }
    }

    /// Convert a JSON scalar. Objects and arrays are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Cell, String> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::String(s) => Ok(Some(Scalar::Text(s.clone()))),
            serde_json::Value::Bool(b) => Ok(Some(Scalar::Text(b.to_string()))),
            serde_json::Value::Number(n) => Ok(Some(match n.as_i64() {
                Some(i) => Scalar::Integer(i),
                None => Scalar::Real(n.as_f64().unwrap_or(f64::NAN)),
            })),
            other => Err(format!("expected a scalar value, found {}", other)),
        }
    }

    /// Convert to JSON for the output hand-off.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Integer(n) => serde_json::Value::from(*n),
            Scalar::Real(f) => serde_json::Value::from(*f),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

/// Comparison key of a cell. Null is its own key.
pub fn cell_key(cell: Option<&Scalar>) -> Option<String> {
    cell.map(|s| s.render().into_owned())
}

// =============================================================================
// Identifiers
// =============================================================================

/// Synthetic identifier of one source input (one file of an entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(pub u32);

impl SourceId {
    /// Rows not derived from any source input (static values, built-ins).
    pub const SYNTHETIC: SourceId = SourceId(0);
}

/// Identity of a row: the source it came from plus its sequence number
/// within its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RowId {
    pub source: SourceId,
    pub seq: u64,
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.0, self.seq)
    }
}

// =============================================================================
// Categories
// =============================================================================

/// Where a category's rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Ingested from source inputs during building.
    Source,
    /// Written by operations.
    Derived,
    /// Provided by the runner (e.g. the investigation id).
    Builtin,
    /// Shared read-only reference table.
    Reference,
}

impl Origin {
    /// Whether rows of this category may be modified in place.
    pub fn is_mutable(self) -> bool {
        matches!(self, Origin::Derived)
    }
}

/// A stored row. Cells are aligned with the category's item schema; a
/// cell past the end is null (the schema grew after the row was written).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    cells: Vec<Cell>,
}

impl Row {
    /// Value at a schema position.
    pub fn get(&self, index: usize) -> Option<&Scalar> {
        self.cells.get(index).and_then(|c| c.as_ref())
    }
}

/// A named table of rows with an ordered item schema.
#[derive(Debug, Clone)]
pub struct Category {
    name: String,
    items: Vec<String>,
    rows: Vec<Row>,
    origin: Origin,
    next_seq: u64,
}

impl Category {
    /// Create an empty category. Duplicate item names are collapsed.
    pub fn new<S: AsRef<str>>(name: impl Into<String>, items: &[S], origin: Origin) -> Self {
        let mut category = Self {
            name: name.into(),
            items: Vec::with_capacity(items.len()),
            rows: Vec::new(),
            origin,
            next_seq: 1,
        };
        for item in items {
            category.add_item(item.as_ref());
        }
        category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of an item in the schema.
    pub fn item_index(&self, item: &str) -> Option<usize> {
        self.items.iter().position(|i| i == item)
    }

    /// Add an item to the schema if missing; returns its position.
    pub fn add_item(&mut self, item: &str) -> usize {
        match self.item_index(item) {
            Some(idx) => idx,
            None => {
                self.items.push(item.to_string());
                self.items.len() - 1
            }
        }
    }

    /// Append a row of schema-aligned cells, assigning the next sequence number.
    pub fn push(&mut self, source: SourceId, mut cells: Vec<Cell>) -> RowId {
        cells.truncate(self.items.len());
        let id = RowId {
            source,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.rows.push(Row { id, cells });
        id
    }

    /// Value of `item` on row `row`.
    pub fn value(&self, row: usize, item: &str) -> Option<&Scalar> {
        let idx = self.item_index(item)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Overwrite one cell of an existing row, growing the schema if needed.
    pub(crate) fn set(&mut self, row: usize, item: &str, value: Cell) {
        let idx = self.add_item(item);
        if let Some(r) = self.rows.get_mut(row) {
            if r.cells.len() <= idx {
                r.cells.resize(idx + 1, None);
            }
            r.cells[idx] = value;
        }
    }

    /// Align an item→value row to this schema. Unknown items are returned
    /// as `Err(item)`; missing items become null.
    pub fn align(&self, row: &RowMap) -> Result<Vec<Cell>, String> {
        if let Some(unknown) = row.keys().find(|k| self.item_index(k).is_none()) {
            return Err(unknown.clone());
        }
        Ok(self
            .items
            .iter()
            .map(|item| row.get(item).cloned().flatten())
            .collect())
    }
}
