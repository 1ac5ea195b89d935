//! Operation interpreter.
//!
//! Executes a loaded [`OperationList`] against one [`Store`]. Operations
//! run strictly in file order; later operations read categories written by
//! earlier ones.
//!
//! Missing data never fails a run. An operation that cannot complete
//! (source category absent or empty, lookup table absent, in-place fill on
//! an ingested category) is skipped as a whole and recorded as a
//! [`SkipRecord`]; row-wise kinds also record single rows they cannot
//! produce. Rows are computed before anything is written, so a skipped
//! operation leaves its target untouched.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::definition::OperationList;
use super::operations::{concatenate, split_segments, Operation, OperationKind, Step};
use crate::error::{PipelineError, PipelineResult, StoreError};
use crate::input::EntrySource;
use crate::models::{cell_key, Category, Cell, Origin, RowId, RowMap, Scalar, SourceId};
use crate::reference::ReferenceTables;
use crate::store::{DerivedRow, SelectedRow, Store};

/// Lifecycle of an [`Interpreter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Building,
    Transforming,
    Finalized,
}

/// An operation (or one row of it) that could not complete for lack of data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkipRecord {
    pub operation_index: usize,
    pub operation: OperationKind,
    pub source_category: String,
    pub source_items: Vec<String>,
    /// Set when a single row was skipped rather than the whole operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<RowId>,
    pub reason: String,
}

impl SkipRecord {
    fn operation(op: &Operation, reason: impl Into<String>) -> Self {
        Self {
            operation_index: op.index,
            operation: op.kind(),
            source_category: op.source_category.clone(),
            source_items: op.source_items.clone(),
            row: None,
            reason: reason.into(),
        }
    }

    fn row(op: &Operation, row: RowId, reason: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            ..Self::operation(op, reason)
        }
    }
}

/// Result of executing an operation list
#[derive(Debug, Default)]
pub struct TransformResult {
    /// Skip records, in execution order
    pub skipped: Vec<SkipRecord>,
    /// Operations that ran (possibly with skipped rows)
    pub operations_run: usize,
    /// Operations skipped as a whole
    pub operations_skipped: usize,
    /// Rows written or updated
    pub rows_written: usize,
}

impl TransformResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing was skipped
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Get summary statistics
    pub fn summary(&self) -> String {
        format!(
            "Operations: {} run, {} skipped; {} rows written; {} skip records",
            self.operations_run,
            self.operations_skipped,
            self.rows_written,
            self.skipped.len()
        )
    }
}

/// Execute every operation of `program` against `store`, in order.
///
/// # Returns
/// A TransformResult with the skip records of the run
pub fn execute(store: &mut Store, program: &OperationList) -> TransformResult {
    let mut result = TransformResult::new();

    for op in program.operations() {
        match run_operation(store, op, &mut result.skipped) {
            Ok(written) => {
                result.operations_run += 1;
                result.rows_written += written;
            }
            Err(reason) => {
                result.operations_skipped += 1;
                result.skipped.push(SkipRecord::operation(op, reason));
            }
        }
    }

    result
}

/// Run one operation. `Err` carries the reason to skip it as a whole.
fn run_operation(
    store: &mut Store,
    op: &Operation,
    skipped: &mut Vec<SkipRecord>,
) -> Result<usize, String> {
    match &op.step {
        Step::Noop => Ok(0),
        Step::DirectTransfer => {
            let rows = source_rows(store, op, &op.source_items)?
                .into_iter()
                .map(|row| DerivedRow::new(row.id.source, row.cells()))
                .collect();
            write(store, op, rows)
        }
        Step::Concatenate { delimiter } => {
            let rows = derive_concatenate(store, op, delimiter, skipped)?;
            write(store, op, rows)
        }
        Step::Split { delimiter } => {
            let rows = derive_split(store, op, delimiter, skipped)?;
            write(store, op, rows)
        }
        Step::DistinctGroup { group_by } => {
            let rows = derive_distinct_group(store, op, group_by)?;
            write(store, op, rows)
        }
        Step::Lookup {
            lookup_category,
            join_key,
            lookup_key,
            lookup_items,
        } => {
            let rows = derive_lookup(store, op, lookup_category, join_key, lookup_key, lookup_items)?;
            write(store, op, rows)
        }
        Step::DefaultFill { value } if op.source_category == op.target_category => {
            fill_in_place(store, op, value)
        }
        Step::DefaultFill { value } => {
            let rows = source_rows(store, op, &op.source_items)?
                .into_iter()
                .map(|row| {
                    let cells = row
                        .values
                        .iter()
                        .map(|v| Some(v.cloned().unwrap_or_else(|| value.clone())))
                        .collect();
                    DerivedRow::new(row.id.source, cells)
                })
                .collect();
            write(store, op, rows)
        }
        Step::StaticValue { values } => {
            let rows = vec![DerivedRow::new(SourceId::SYNTHETIC, values.clone())];
            write(store, op, rows)
        }
        Step::AutoIncrement { group_by } => auto_increment(store, op, group_by),
    }
}

/// Selected source rows, or the reason the operation has nothing to read.
fn source_rows<'a>(
    store: &'a Store,
    op: &'a Operation,
    items: &[String],
) -> Result<Vec<SelectedRow<'a>>, String> {
    let selection = store.select(&op.source_category, items, op.filter.as_ref());
    if !selection.category_exists() {
        return Err(format!("source category '{}' not found", op.source_category));
    }
    let rows: Vec<_> = selection.collect();
    if rows.is_empty() {
        return Err(match &op.filter {
            Some(filter) => format!(
                "no rows of '{}' pass the filter on '{}'",
                op.source_category, filter.item
            ),
            None => format!("source category '{}' has no rows", op.source_category),
        });
    }
    Ok(rows)
}

fn write(store: &mut Store, op: &Operation, rows: Vec<DerivedRow>) -> Result<usize, String> {
    store
        .upsert(&op.target_category, &op.target_items, rows, op.distinct)
        .map_err(|e| e.to_string())
}

fn derive_concatenate(
    store: &Store,
    op: &Operation,
    delimiter: &str,
    skipped: &mut Vec<SkipRecord>,
) -> Result<Vec<DerivedRow>, String> {
    let mut rows = Vec::new();
    for row in source_rows(store, op, &op.source_items)? {
        match concatenate(&row.values, delimiter) {
            Some(joined) => rows.push(DerivedRow::new(row.id.source, vec![Some(Scalar::Text(joined))])),
            None => skipped.push(SkipRecord::row(op, row.id, "all source items are null")),
        }
    }
    Ok(rows)
}

fn derive_split(
    store: &Store,
    op: &Operation,
    delimiter: &str,
    skipped: &mut Vec<SkipRecord>,
) -> Result<Vec<DerivedRow>, String> {
    let mut rows = Vec::new();
    for row in source_rows(store, op, &op.source_items)? {
        let Some((head, carried)) = row.values.split_first() else {
            continue;
        };
        let text = head.map(|v| v.render()).unwrap_or_default();
        let segments = split_segments(&text, delimiter);
        if segments.is_empty() {
            let reason = match head {
                None => format!("'{}' is null", op.source_items[0]),
                Some(_) => format!("'{}' has no segments", op.source_items[0]),
            };
            skipped.push(SkipRecord::row(op, row.id, reason));
            continue;
        }
        for segment in segments {
            let mut cells: Vec<Cell> = Vec::with_capacity(row.values.len());
            cells.push(Some(Scalar::text(segment)));
            cells.extend(carried.iter().map(|v| v.cloned()));
            rows.push(DerivedRow::new(row.id.source, cells));
        }
    }
    Ok(rows)
}

fn derive_distinct_group(
    store: &Store,
    op: &Operation,
    group_by: &[usize],
) -> Result<Vec<DerivedRow>, String> {
    let mut seen: HashSet<Vec<Option<String>>> = HashSet::new();
    let rows = source_rows(store, op, &op.source_items)?
        .into_iter()
        .filter(|row| seen.insert(group_by.iter().map(|i| cell_key(row.values[*i])).collect()))
        .map(|row| DerivedRow::new(row.id.source, row.cells()))
        .collect();
    Ok(rows)
}

fn derive_lookup(
    store: &Store,
    op: &Operation,
    lookup_category: &str,
    join_key: &str,
    lookup_key: &str,
    lookup_items: &[String],
) -> Result<Vec<DerivedRow>, String> {
    let table = store
        .resolve(lookup_category)
        .ok_or_else(|| format!("lookup category '{}' not found", lookup_category))?;
    let key_column = table
        .item_index(lookup_key)
        .ok_or_else(|| format!("'{}' is not an item of '{}'", lookup_key, lookup_category))?;

    // First matching row wins
    let mut index: HashMap<String, usize> = HashMap::new();
    for (position, row) in table.rows().iter().enumerate() {
        if let Some(key) = cell_key(row.get(key_column)) {
            index.entry(key).or_insert(position);
        }
    }
    let enrichment_columns: Vec<Option<usize>> =
        lookup_items.iter().map(|item| table.item_index(item)).collect();

    let mut items = op.source_items.clone();
    items.push(join_key.to_string());
    let width = op.source_items.len();

    let selected = source_rows(store, op, &items)?;
    let source_has_key = store
        .resolve(&op.source_category)
        .is_some_and(|c| c.item_index(join_key).is_some());
    if !source_has_key {
        return Err(format!(
            "join key '{}' is not an item of '{}'",
            join_key, op.source_category
        ));
    }

    let rows = selected
        .into_iter()
        .map(|row| {
            let matched = cell_key(row.values[width]).and_then(|key| index.get(&key).copied());
            let mut cells: Vec<Cell> = row.values[..width].iter().map(|v| v.cloned()).collect();
            cells.extend(enrichment_columns.iter().map(|column| {
                let target = &table.rows()[matched?];
                target.get((*column)?).cloned()
            }));
            DerivedRow::new(row.id.source, cells)
        })
        .collect();
    Ok(rows)
}

/// `default_fill` with source = target: update null cells of a derived category.
fn fill_in_place(store: &mut Store, op: &Operation, value: &Scalar) -> Result<usize, String> {
    let category = store
        .category(&op.target_category)
        .ok_or_else(|| format!("target category '{}' not found", op.target_category))?;
    if !category.origin().is_mutable() {
        return Err(format!(
            "category '{}' is not derived and cannot be filled in place",
            op.target_category
        ));
    }

    let mut updates = Vec::new();
    for row in source_rows(store, op, &op.source_items)? {
        for (position, v) in row.values.iter().enumerate() {
            if v.is_none() {
                updates.push((row.index, position));
            }
        }
    }

    for (row, position) in &updates {
        store
            .update_item(
                &op.target_category,
                *row,
                &op.target_items[*position],
                Some(value.clone()),
            )
            .map_err(|e| e.to_string())?;
    }
    Ok(updates.len())
}

/// Number the rows of the target category, restarting per `group_by` key.
fn auto_increment(store: &mut Store, op: &Operation, group_by: &[String]) -> Result<usize, String> {
    let category = store
        .category(&op.target_category)
        .ok_or_else(|| format!("target category '{}' not found", op.target_category))?;
    if category.is_empty() {
        return Err(format!("target category '{}' has no rows", op.target_category));
    }
    if !category.origin().is_mutable() {
        return Err(format!(
            "category '{}' is not derived and cannot be numbered",
            op.target_category
        ));
    }

    let mut counters: HashMap<Vec<Option<String>>, i64> = HashMap::new();
    let numbers: Vec<(usize, i64)> = store
        .select(&op.target_category, group_by, None)
        .map(|row| {
            let key = row.values.iter().map(|v| cell_key(*v)).collect();
            let counter = counters.entry(key).or_insert(0);
            *counter += 1;
            (row.index, *counter)
        })
        .collect();

    let item = &op.target_items[0];
    for (row, number) in &numbers {
        store
            .update_item(&op.target_category, *row, item, Some(Scalar::Integer(*number)))
            .map_err(|e| e.to_string())?;
    }
    Ok(numbers.len())
}

// =============================================================================
// Interpreter
// =============================================================================

/// Drives one invocation through `Idle → Building → Transforming → Finalized`.
///
/// Owns its [`Store`]. Calls out of order fail with [`PipelineError::Phase`].
#[derive(Debug)]
pub struct Interpreter {
    program: Arc<OperationList>,
    store: Store,
    phase: Phase,
    result: TransformResult,
}

impl Interpreter {
    pub fn new(program: Arc<OperationList>, references: Arc<ReferenceTables>) -> Self {
        Self {
            program,
            store: Store::with_references(references),
            phase: Phase::Idle,
            result: TransformResult::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn program(&self) -> &OperationList {
        &self.program
    }

    fn require(&self, expected: Phase, allowed: &[Phase]) -> PipelineResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(PipelineError::Phase {
                expected,
                actual: self.phase,
            })
        }
    }

    /// Ingest every category of one entry as a new source.
    ///
    /// A category seen for the first time takes its declared items, or the
    /// items present in its rows; a later source may add items. Only
    /// source categories accept entry rows: a name already taken by a
    /// builtin is a [`StoreError::DuplicateCategory`].
    pub fn ingest(&mut self, entry: &EntrySource) -> PipelineResult<SourceId> {
        self.require(Phase::Building, &[Phase::Idle, Phase::Building])?;
        self.phase = Phase::Building;

        let source = self.store.register_source(entry.entry_id.clone());
        for category in &entry.categories {
            let items = category.schema();
            match self.store.category(&category.name).map(Category::origin) {
                Some(Origin::Source) => self.store.extend_schema(&category.name, &items)?,
                Some(_) => {
                    return Err(StoreError::DuplicateCategory(category.name.clone()).into());
                }
                None => self.store.create_category(&category.name, &items)?,
            }
            self.store.ingest(&category.name, source, &category.rows)?;
        }
        Ok(source)
    }

    /// Add a single-row category provided by the runner.
    pub fn add_builtin(&mut self, name: &str, row: &RowMap) -> PipelineResult<()> {
        self.require(Phase::Building, &[Phase::Idle, Phase::Building])?;
        self.phase = Phase::Building;

        let items: Vec<&String> = row.keys().collect();
        self.store.create_builtin(name, &items)?;
        self.store.ingest(name, SourceId::SYNTHETIC, [row])?;
        Ok(())
    }

    /// Run all operations. Allowed once, after at least one ingestion.
    pub fn transform(&mut self) -> PipelineResult<&TransformResult> {
        self.require(Phase::Building, &[Phase::Building])?;
        self.phase = Phase::Transforming;
        self.result = execute(&mut self.store, &self.program);
        self.phase = Phase::Finalized;
        Ok(&self.result)
    }

    /// Hand off the finalized store and the run's skip records.
    pub fn finish(self) -> PipelineResult<(Store, TransformResult)> {
        self.require(Phase::Finalized, &[Phase::Finalized])?;
        Ok((self.store, self.result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::CategoryRows;
    use serde_json::json;

    fn program(operations: serde_json::Value) -> OperationList {
        OperationList::from_value(&json!({ "operations": operations })).unwrap()
    }

    fn rows(values: serde_json::Value) -> Vec<RowMap> {
        serde_json::from_value(values).unwrap()
    }

    fn store_with(category: &str, items: &[&str], data: serde_json::Value) -> Store {
        let mut store = Store::new();
        let source = store.register_source("1abc");
        store.create_category(category, items).unwrap();
        store.ingest(category, source, &rows(data)).unwrap();
        store
    }

    fn column(store: &Store, category: &str, item: &str) -> Vec<Cell> {
        store.select(category, &[item], None).map(|r| r.values[0].cloned()).collect()
    }

    fn text(value: &str) -> Cell {
        Some(Scalar::text(value))
    }

    #[test]
    fn test_direct_transfer_preserves_count_and_order() {
        let mut store = store_with(
            "entity",
            &["id", "type"],
            json!([{"id": "1", "type": "polymer"}, {"id": "2"}, {"id": "3", "type": "water"}]),
        );
        let ops = program(json!([{
            "operation": "direct_transfer",
            "source_category": "entity",
            "source_items": ["id", "type", "missing"],
            "target_category": "molecule",
            "target_items": ["entity_id", "kind", "note"]
        }]));
        let result = execute(&mut store, &ops);

        assert!(result.is_complete());
        assert_eq!(column(&store, "molecule", "entity_id"), vec![text("1"), text("2"), text("3")]);
        assert_eq!(column(&store, "molecule", "kind"), vec![text("polymer"), None, text("water")]);
        assert_eq!(column(&store, "molecule", "note"), vec![None, None, None]);
    }

    #[test]
    fn test_derived_rows_keep_source_id() {
        let mut store = Store::new();
        let first = store.register_source("1abc");
        let second = store.register_source("2xyz");
        store.create_category("entity", &["id"]).unwrap();
        store.ingest("entity", first, &rows(json!([{"id": "1"}]))).unwrap();
        store.ingest("entity", second, &rows(json!([{"id": "1"}]))).unwrap();

        let ops = program(json!([{
            "operation": "direct_transfer",
            "source_category": "entity",
            "source_items": ["id"],
            "target_category": "molecule",
            "target_items": ["id"]
        }]));
        execute(&mut store, &ops);
        let sources: Vec<_> = store.select("molecule", &["id"], None).map(|r| r.id.source).collect();
        assert_eq!(sources, vec![first, second]);
    }

    #[test]
    fn test_concatenate_skips_all_null_rows() {
        let mut store = store_with(
            "entity",
            &["pdb_id", "id"],
            json!([{"pdb_id": "1abc", "id": 1}, {}, {"id": 2}, {}]),
        );
        let ops = program(json!([{
            "operation": "concatenate",
            "source_category": "entity",
            "source_items": ["pdb_id", "id"],
            "target_category": "sample",
            "target_items": ["name"],
            "parameters": {"delimiter": "_"}
        }]));
        let result = execute(&mut store, &ops);

        assert_eq!(column(&store, "sample", "name"), vec![text("1abc_1"), text("_2")]);
        assert_eq!(result.skipped.len(), 2);
        assert!(result.skipped.iter().all(|s| s.row.is_some()));
        assert_eq!(result.operations_skipped, 0);
    }

    #[test]
    fn test_split_segments_and_carries_items() {
        let mut store = store_with(
            "sample",
            &["id", "comp"],
            json!([{"id": 1, "comp": "A B  C"}, {"id": 2, "comp": ""}]),
        );
        let ops = program(json!([{
            "operation": "split",
            "source_category": "sample",
            "source_items": ["comp", "id"],
            "target_category": "residue",
            "target_items": ["code", "sample_id"]
        }]));
        let result = execute(&mut store, &ops);

        assert_eq!(column(&store, "residue", "code"), vec![text("A"), text("B"), text("C")]);
        assert_eq!(
            column(&store, "residue", "sample_id"),
            vec![Some(Scalar::Integer(1)); 3]
        );
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].row.map(|r| r.seq), Some(2));
    }

    #[test]
    fn test_distinct_group_first_seen() {
        let mut store = store_with(
            "chem_comp",
            &["id", "name"],
            json!([{"id": 1, "name": "x"}, {"id": 1, "name": "x"}, {"id": 2, "name": "y"}]),
        );
        let ops = program(json!([{
            "operation": "distinct_group",
            "source_category": "chem_comp",
            "source_items": ["id", "name"],
            "target_category": "ligand",
            "target_items": ["id", "name"]
        }]));
        execute(&mut store, &ops);
        assert_eq!(store.category("ligand").unwrap().len(), 2);
        assert_eq!(column(&store, "ligand", "name"), vec![text("x"), text("y")]);
    }

    #[test]
    fn test_distinct_group_by_subset_keeps_first_values() {
        let mut store = store_with(
            "chem_comp",
            &["id", "name"],
            json!([{"id": "ATP", "name": "first"}, {"id": "ATP", "name": "second"}]),
        );
        let ops = program(json!([{
            "operation": "distinct_group",
            "source_category": "chem_comp",
            "source_items": ["id", "name"],
            "target_category": "ligand",
            "target_items": ["id", "name"],
            "parameters": {"group_by": ["id"]}
        }]));
        execute(&mut store, &ops);
        assert_eq!(column(&store, "ligand", "name"), vec![text("first")]);
    }

    #[test]
    fn test_lookup_no_match_yields_nulls() {
        let mut tables = ReferenceTables::new();
        tables
            .insert_csv("inchi", "CHEM_COMP_ID,DESCRIPTOR\nATP,ZKHQ\n".as_bytes())
            .unwrap();
        let mut store = Store::with_references(Arc::new(tables));
        let source = store.register_source("1abc");
        store.create_category("ligand", &["comp_id"]).unwrap();
        store
            .ingest("ligand", source, &rows(json!([{"comp_id": "ATP"}, {"comp_id": "XYZ"}, {}])))
            .unwrap();

        let ops = program(json!([{
            "operation": "lookup",
            "source_category": "ligand",
            "source_items": ["comp_id"],
            "target_category": "ligand_inchi",
            "target_items": ["comp_id", "inchikey"],
            "parameters": {
                "lookup_category": "inchi",
                "join_key": "comp_id",
                "lookup_key": "CHEM_COMP_ID",
                "lookup_items": ["DESCRIPTOR"]
            }
        }]));
        let result = execute(&mut store, &ops);

        assert!(result.is_complete());
        assert_eq!(column(&store, "ligand_inchi", "inchikey"), vec![text("ZKHQ"), None, None]);
        assert_eq!(store.category("ligand_inchi").unwrap().len(), 3);
    }

    #[test]
    fn test_missing_lookup_category_skips_operation() {
        let mut store = store_with("ligand", &["comp_id"], json!([{"comp_id": "ATP"}]));
        let ops = program(json!([{
            "operation": "lookup",
            "source_category": "ligand",
            "source_items": ["comp_id"],
            "target_category": "ligand_inchi",
            "target_items": ["comp_id", "inchikey"],
            "parameters": {
                "lookup_category": "inchi",
                "join_key": "comp_id",
                "lookup_items": ["inchikey"]
            }
        }]));
        let result = execute(&mut store, &ops);

        assert_eq!(result.operations_skipped, 1);
        assert!(result.skipped[0].reason.contains("inchi"));
        assert!(store.category("ligand_inchi").is_none());
    }

    #[test]
    fn test_default_fill_copy_and_in_place() {
        let mut store = store_with("entity", &["id", "type"], json!([{"id": 1}, {"id": 2, "type": "water"}]));
        let ops = program(json!([
            {
                "operation": "default_fill",
                "source_category": "entity",
                "source_items": ["type"],
                "target_category": "molecule",
                "target_items": ["type"],
                "parameters": {"value": "?"}
            },
            {
                "operation": "direct_transfer",
                "source_category": "entity",
                "source_items": ["type"],
                "target_category": "copy",
                "target_items": ["type"]
            },
            {
                "operation": "default_fill",
                "source_category": "copy",
                "source_items": ["type"],
                "target_category": "copy",
                "target_items": ["type"],
                "parameters": {"value": "unknown"}
            },
            {
                "operation": "default_fill",
                "source_category": "entity",
                "source_items": ["type"],
                "target_category": "entity",
                "target_items": ["type"],
                "parameters": {"value": "unknown"}
            }
        ]));
        let result = execute(&mut store, &ops);

        assert_eq!(column(&store, "molecule", "type"), vec![text("?"), text("water")]);
        assert_eq!(column(&store, "copy", "type"), vec![text("unknown"), text("water")]);
        assert_eq!(column(&store, "entity", "type"), vec![None, text("water")]);
        assert_eq!(result.operations_skipped, 1);
        assert_eq!(result.skipped[0].operation_index, 3);
    }

    #[test]
    fn test_static_value_and_auto_increment() {
        let mut store = store_with(
            "entity",
            &["id", "type"],
            json!([{"id": 1, "type": "polymer"}, {"id": 2, "type": "water"}, {"id": 3, "type": "polymer"}]),
        );
        let ops = program(json!([
            {
                "operation": "direct_transfer",
                "source_category": "entity",
                "source_items": ["type"],
                "target_category": "molecule",
                "target_items": ["type"]
            },
            {
                "operation": "auto_increment",
                "target_category": "molecule",
                "target_items": ["ordinal"]
            },
            {
                "operation": "auto_increment",
                "target_category": "molecule",
                "target_items": ["per_type"],
                "parameters": {"group_by": ["type"]}
            },
            {
                "operation": "static_value",
                "target_category": "facility",
                "target_items": ["name", "country"],
                "parameters": {"values": ["PDBe", "UK"]}
            },
            {
                "operation": "auto_increment",
                "target_category": "nothing",
                "target_items": ["id"]
            },
            { "operation": "noop", "target_category": "molecule", "target_items": [] }
        ]));
        let result = execute(&mut store, &ops);

        let ints = |v: &[i64]| v.iter().map(|n| Some(Scalar::Integer(*n))).collect::<Vec<_>>();
        assert_eq!(column(&store, "molecule", "ordinal"), ints(&[1, 2, 3]));
        assert_eq!(column(&store, "molecule", "per_type"), ints(&[1, 1, 2]));
        assert_eq!(column(&store, "facility", "country"), vec![text("UK")]);
        assert_eq!(result.operations_skipped, 1);
        assert_eq!(result.operations_run, 5);
    }

    #[test]
    fn test_filter_and_distinct_flag() {
        let mut store = store_with(
            "entity",
            &["id", "type"],
            json!([
                {"id": "1", "type": "polymer"},
                {"id": "2", "type": "water"},
                {"id": "1", "type": "polymer"}
            ]),
        );
        let ops = program(json!([
            {
                "operation": "direct_transfer",
                "source_category": "entity",
                "source_items": ["id"],
                "target_category": "polymer",
                "target_items": ["entity_id"],
                "parameters": {"distinct": true, "filter": {"item": "type", "equals": "polymer"}}
            },
            {
                "operation": "direct_transfer",
                "source_category": "entity",
                "source_items": ["id"],
                "target_category": "branched",
                "target_items": ["entity_id"],
                "parameters": {"filter": {"item": "type", "matches": "^branch"}}
            }
        ]));
        let result = execute(&mut store, &ops);

        assert_eq!(column(&store, "polymer", "entity_id"), vec![text("1")]);
        assert_eq!(result.operations_skipped, 1);
        assert!(result.skipped[0].reason.contains("filter"));
        assert!(store.category("branched").is_none());
    }

    #[test]
    fn test_later_operations_read_earlier_targets() {
        let mut store = store_with("sample", &["comp"], json!([{"comp": "ALA GLY ALA"}]));
        let ops = program(json!([
            {
                "operation": "split",
                "source_category": "sample",
                "source_items": ["comp"],
                "target_category": "residue",
                "target_items": ["code"]
            },
            {
                "operation": "distinct_group",
                "source_category": "residue",
                "source_items": ["code"],
                "target_category": "component",
                "target_items": ["id"]
            }
        ]));
        execute(&mut store, &ops);
        assert_eq!(column(&store, "component", "id"), vec![text("ALA"), text("GLY")]);
    }

    #[test]
    fn test_interpreter_phases() {
        let ops = Arc::new(program(json!([{
            "operation": "split",
            "source_category": "sample",
            "source_items": ["comp"],
            "target_category": "residue",
            "target_items": ["code"]
        }])));
        let mut interpreter = Interpreter::new(ops, Arc::new(ReferenceTables::new()));
        assert_eq!(interpreter.phase(), Phase::Idle);

        let err = interpreter.transform().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Phase { expected: Phase::Building, actual: Phase::Idle }
        ));

        let entry = EntrySource {
            entry_id: "1abc".into(),
            group_id: None,
            categories: vec![CategoryRows {
                name: "sample".into(),
                items: None,
                rows: rows(json!([{"id": 1, "comp": "ALA GLY"}])),
            }],
        };
        interpreter.ingest(&entry).unwrap();
        assert_eq!(interpreter.phase(), Phase::Building);

        assert!(interpreter.transform().unwrap().is_complete());
        assert_eq!(interpreter.phase(), Phase::Finalized);
        assert!(interpreter.ingest(&entry).is_err());

        let (store, result) = interpreter.finish().unwrap();
        assert!(result.skipped.is_empty());
        assert_eq!(column(&store, "residue", "code"), vec![text("ALA"), text("GLY")]);
    }

    fn entry(entry_id: &str, name: &str, data: serde_json::Value) -> EntrySource {
        EntrySource {
            entry_id: entry_id.into(),
            group_id: None,
            categories: vec![CategoryRows {
                name: name.into(),
                items: None,
                rows: rows(data),
            }],
        }
    }

    #[test]
    fn test_later_entry_extends_category_schema() {
        let ops = Arc::new(program(json!([{
            "operation": "direct_transfer",
            "source_category": "entity",
            "source_items": ["id", "type"],
            "target_category": "molecule",
            "target_items": ["id", "type"]
        }])));
        let mut interpreter = Interpreter::new(ops, Arc::new(ReferenceTables::new()));
        interpreter
            .ingest(&entry("1abc", "entity", json!([{"id": 1}])))
            .unwrap();
        interpreter
            .ingest(&entry("2xyz", "entity", json!([{"id": 2, "type": "polymer"}])))
            .unwrap();
        interpreter.transform().unwrap();

        let (store, result) = interpreter.finish().unwrap();
        assert!(result.is_complete());
        assert_eq!(store.category("entity").unwrap().items(), ["id", "type"]);
        assert_eq!(column(&store, "molecule", "type"), vec![None, text("polymer")]);
    }

    #[test]
    fn test_entry_cannot_write_into_builtin() {
        let ops = Arc::new(program(json!([{
            "operation": "direct_transfer",
            "source_category": "_investigation",
            "source_items": ["id"],
            "target_category": "investigation",
            "target_items": ["id"]
        }])));
        let mut interpreter = Interpreter::new(ops, Arc::new(ReferenceTables::new()));
        let mut builtin = RowMap::new();
        builtin.insert("id".into(), Some(Scalar::Text("G_1".into())));
        interpreter.add_builtin("_investigation", &builtin).unwrap();

        let err = interpreter
            .ingest(&entry("1abc", "_investigation", json!([{"id": "1ABC"}])))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Store(StoreError::DuplicateCategory(ref name)) if name == "_investigation"
        ));
        assert_eq!(interpreter.store().category("_investigation").unwrap().len(), 1);
    }
}
