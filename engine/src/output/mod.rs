//! Output hand-off.
//!
//! The output document is a projection of the finalized store onto the
//! designated output categories, with item order fixed by the operation
//! file. Rendering to the facility's text format happens downstream; the
//! engine writes this projection as JSON, next to a run report holding the
//! skip records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Category, Origin};
use crate::store::Store;
use crate::transform::dsl::{OperationList, SkipRecord, TransformResult};

/// One output category: ordered items, rows aligned with them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputCategory {
    pub name: String,
    pub items: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// The investigation file content, before rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputDocument {
    pub investigation_id: String,
    pub categories: Vec<OutputCategory>,
    /// Designated categories no operation produced
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_categories: Vec<String>,
}

impl OutputDocument {
    /// Project the output categories of a finalized store.
    ///
    /// Without designated output categories, every derived category is
    /// output in creation order.
    pub fn project(investigation_id: &str, store: &Store, program: &OperationList) -> Self {
        let names: Vec<String> = match program.output_categories() {
            Some(names) => names.to_vec(),
            None => store
                .categories()
                .filter(|c| c.origin() == Origin::Derived)
                .map(|c| c.name().to_string())
                .collect(),
        };

        let mut categories = Vec::new();
        let mut missing_categories = Vec::new();
        for name in names {
            match store.category(&name) {
                Some(category) => {
                    categories.push(project_category(category, program.item_order(&name)))
                }
                None => missing_categories.push(name),
            }
        }

        Self {
            investigation_id: investigation_id.to_string(),
            categories,
            missing_categories,
        }
    }

    pub fn category(&self, name: &str) -> Option<&OutputCategory> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Ordered items: `leading` first (when the category has them), then the
/// rest in schema order.
fn project_category(category: &Category, leading: &[String]) -> OutputCategory {
    let mut items: Vec<String> = leading
        .iter()
        .filter(|item| category.item_index(item).is_some())
        .cloned()
        .collect();
    for item in category.items() {
        if !items.contains(item) {
            items.push(item.clone());
        }
    }

    let columns: Vec<usize> = items.iter().filter_map(|item| category.item_index(item)).collect();
    let rows = category
        .rows()
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(*c).map_or(Value::Null, |v| v.to_json()))
                .collect()
        })
        .collect();

    OutputCategory {
        name: category.name().to_string(),
        items,
        rows,
    }
}

/// Diagnostics of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub investigation_id: String,
    pub invocation_id: Uuid,
    pub entries: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub operations_run: usize,
    pub operations_skipped: usize,
    pub rows_written: usize,
    pub skipped: Vec<SkipRecord>,
}

impl RunReport {
    pub fn new(
        investigation_id: &str,
        invocation_id: Uuid,
        entries: Vec<String>,
        started_at: DateTime<Utc>,
        result: TransformResult,
    ) -> Self {
        Self {
            investigation_id: investigation_id.to_string(),
            invocation_id,
            entries,
            started_at,
            finished_at: Utc::now(),
            operations_run: result.operations_run,
            operations_skipped: result.operations_skipped,
            rows_written: result.rows_written,
            skipped: result.skipped,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
