//! Denormalized store: the working set of one invocation.
//!
//! Rows from every source input of an entry (or group of entries) are
//! ingested into category tables, each row tagged with the [`SourceId`]
//! of the input it came from. The interpreter then reads with
//! [`Store::select`] and writes derived rows with [`Store::upsert`].
//!
//! ```text
//! entry 1 ─┐                   ┌─ entity      (source)
//! entry 2 ─┼─▶ ingest ─▶ Store ├─ sample      (derived)
//! entry 3 ─┘                   └─ ref:chem_comp (shared, read-only)
//! ```
//!
//! Categories hold tens to low thousands of rows, so selection is a scan
//! with a predicate; there is no query planner.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::models::{cell_key, Category, Cell, Origin, RowId, RowMap, Scalar, SourceId};
use crate::reference::ReferenceTables;

// =============================================================================
// Row filters
// =============================================================================

/// Predicate over one item of a row.
#[derive(Debug, Clone)]
pub enum FilterCondition {
    /// Rendered value equals the text.
    Equals(String),
    /// Rendered value matches the pattern.
    Matches(Regex),
    /// Value is null or absent.
    IsNull,
    /// Value is present.
    NotNull,
}

/// Narrows a selection to rows satisfying a condition on one item.
#[derive(Debug, Clone)]
pub struct RowFilter {
    pub item: String,
    pub condition: FilterCondition,
}

impl RowFilter {
    fn accepts(&self, value: Option<&Scalar>) -> bool {
        match (&self.condition, value) {
            (FilterCondition::IsNull, v) => v.is_none(),
            (FilterCondition::NotNull, v) => v.is_some(),
            (FilterCondition::Equals(expected), Some(v)) => v.render() == expected.as_str(),
            (FilterCondition::Matches(re), Some(v)) => re.is_match(&v.render()),
            (_, None) => false,
        }
    }
}

// =============================================================================
// Selection
// =============================================================================

/// One selected row, projected onto the requested items.
#[derive(Debug, Clone)]
pub struct SelectedRow<'a> {
    /// Identity of the stored row.
    pub id: RowId,
    /// Position of the row in its category.
    pub index: usize,
    /// Values in the order the items were requested; absent items are `None`.
    pub values: Vec<Option<&'a Scalar>>,
}

impl SelectedRow<'_> {
    /// Owned copy of the projected values.
    pub fn cells(&self) -> Vec<Cell> {
        self.values.iter().map(|v| v.cloned()).collect()
    }

    /// True if every projected value is null.
    pub fn all_null(&self) -> bool {
        self.values.iter().all(|v| v.is_none())
    }
}

/// Lazy, restartable selection over a category. Clone it to iterate again.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    category: Option<&'a Category>,
    columns: Vec<Option<usize>>,
    filter: Option<(&'a RowFilter, Option<usize>)>,
    next: usize,
}

impl<'a> Selection<'a> {
    fn empty() -> Self {
        Self {
            category: None,
            columns: Vec::new(),
            filter: None,
            next: 0,
        }
    }

    /// Whether the selected category exists at all.
    pub fn category_exists(&self) -> bool {
        self.category.is_some()
    }
}

impl<'a> Iterator for Selection<'a> {
    type Item = SelectedRow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let category = self.category?;
        while let Some(row) = category.rows().get(self.next) {
            let index = self.next;
            self.next += 1;

            if let Some((filter, column)) = self.filter {
                let value = column.and_then(|c| row.get(c));
                if !filter.accepts(value) {
                    continue;
                }
            }

            let values = self
                .columns
                .iter()
                .map(|c| c.and_then(|c| row.get(c)))
                .collect();
            return Some(SelectedRow {
                id: row.id,
                index,
                values,
            });
        }
        None
    }
}

// =============================================================================
// Store
// =============================================================================

/// A derived row waiting to be written by [`Store::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRow {
    /// Source the row was computed from.
    pub source: SourceId,
    /// Values aligned with the target items.
    pub cells: Vec<Cell>,
}

impl DerivedRow {
    pub fn new(source: SourceId, cells: Vec<Cell>) -> Self {
        Self { source, cells }
    }
}

/// In-memory category tables for one invocation.
///
/// Owned by exactly one interpreter; never shared between invocations.
/// Only the reference tables behind the `Arc` are shared, read-only.
#[derive(Debug, Default)]
pub struct Store {
    categories: Vec<Category>,
    index: HashMap<String, usize>,
    sources: Vec<String>,
    references: Arc<ReferenceTables>,
}

impl Store {
    /// Create an empty store without reference tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store reading from shared reference tables.
    pub fn with_references(references: Arc<ReferenceTables>) -> Self {
        Self {
            references,
            ..Self::default()
        }
    }

    /// Register a source input and get its identifier (starting at 1).
    pub fn register_source(&mut self, label: impl Into<String>) -> SourceId {
        self.sources.push(label.into());
        SourceId(self.sources.len() as u32)
    }

    /// Label given to a source at registration.
    pub fn source_label(&self, source: SourceId) -> Option<&str> {
        let idx = (source.0 as usize).checked_sub(1)?;
        self.sources.get(idx).map(String::as_str)
    }

    /// Register a source category.
    pub fn create_category<S: AsRef<str>>(&mut self, name: &str, items: &[S]) -> StoreResult<()> {
        self.insert_category(Category::new(name, items, Origin::Source))
    }

    /// Register a category provided by the runner rather than an input.
    pub fn create_builtin<S: AsRef<str>>(&mut self, name: &str, items: &[S]) -> StoreResult<()> {
        self.insert_category(Category::new(name, items, Origin::Builtin))
    }

    fn insert_category(&mut self, category: Category) -> StoreResult<()> {
        if self.index.contains_key(category.name()) {
            return Err(StoreError::DuplicateCategory(category.name().to_string()));
        }
        self.index.insert(category.name().to_string(), self.categories.len());
        self.categories.push(category);
        Ok(())
    }

    /// Declare additional items on an existing category.
    pub fn extend_schema<S: AsRef<str>>(&mut self, name: &str, items: &[S]) -> StoreResult<()> {
        let category = self.category_mut(name)?;
        for item in items {
            category.add_item(item.as_ref());
        }
        Ok(())
    }

    /// Append rows from one source to an existing category.
    ///
    /// Rows are validated before any is written: an unknown item rejects
    /// the whole batch with [`StoreError::SchemaMismatch`].
    pub fn ingest<'r, I>(&mut self, name: &str, source: SourceId, rows: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = &'r RowMap>,
    {
        let category = self.category_mut(name)?;
        let aligned = rows
            .into_iter()
            .map(|row| {
                category.align(row).map_err(|item| StoreError::SchemaMismatch {
                    category: name.to_string(),
                    item,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let count = aligned.len();
        for cells in aligned {
            category.push(source, cells);
        }
        Ok(count)
    }

    /// Select rows of a category, projected onto `items`.
    ///
    /// A missing category yields an empty selection. Store categories
    /// shadow reference tables of the same name.
    pub fn select<'a, S: AsRef<str>>(
        &'a self,
        name: &str,
        items: &[S],
        filter: Option<&'a RowFilter>,
    ) -> Selection<'a> {
        let Some(category) = self.resolve(name) else {
            return Selection::empty();
        };
        Selection {
            category: Some(category),
            columns: items.iter().map(|i| category.item_index(i.as_ref())).collect(),
            filter: filter.map(|f| (f, category.item_index(&f.item))),
            next: 0,
        }
    }

    /// Write rows into a target category, creating it if absent.
    ///
    /// With `distinct`, a row whose values over `items` equal an existing
    /// row (or an earlier row of the same batch) is dropped.
    /// Returns the number of rows written.
    pub fn upsert<S: AsRef<str>>(
        &mut self,
        name: &str,
        items: &[S],
        rows: Vec<DerivedRow>,
        distinct: bool,
    ) -> StoreResult<usize> {
        if !self.index.contains_key(name) {
            self.insert_category(Category::new(name, items, Origin::Derived))?;
        }
        let category = self.category_mut(name)?;
        let columns: Vec<usize> = items.iter().map(|i| category.add_item(i.as_ref())).collect();

        let mut seen: HashSet<Vec<Option<String>>> = HashSet::new();
        if distinct {
            for row in category.rows() {
                seen.insert(columns.iter().map(|c| cell_key(row.get(*c))).collect());
            }
        }

        let width = category.items().len();
        let mut written = 0;
        for row in rows {
            if distinct {
                let key = row.cells.iter().map(|c| cell_key(c.as_ref())).collect();
                if !seen.insert(key) {
                    continue;
                }
            }
            let mut cells = vec![None; width];
            for (column, cell) in columns.iter().zip(row.cells) {
                cells[*column] = cell;
            }
            category.push(row.source, cells);
            written += 1;
        }
        Ok(written)
    }

    /// Distinct value tuples of `items`, in first-seen order.
    pub fn distinct_values<S: AsRef<str>>(&self, name: &str, items: &[S]) -> Vec<Vec<Cell>> {
        let mut seen = HashSet::new();
        self.select(name, items, None)
            .filter(|row| seen.insert(row.values.iter().map(|v| cell_key(*v)).collect::<Vec<_>>()))
            .map(|row| row.cells())
            .collect()
    }

    /// Overwrite one item of a derived row.
    pub fn update_item(&mut self, name: &str, row: usize, item: &str, value: Cell) -> StoreResult<()> {
        let category = self.category_mut(name)?;
        if !category.origin().is_mutable() {
            return Err(StoreError::ReadOnlyCategory(name.to_string()));
        }
        category.set(row, item, value);
        Ok(())
    }

    /// A category of this store (reference tables excluded).
    pub fn category(&self, name: &str) -> Option<&Category> {
        self.index.get(name).map(|idx| &self.categories[*idx])
    }

    /// A store category, falling back to a reference table.
    pub fn resolve(&self, name: &str) -> Option<&Category> {
        self.category(name).or_else(|| self.references.get(name))
    }

    /// Categories in creation order.
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    fn category_mut(&mut self, name: &str) -> StoreResult<&mut Category> {
        match self.index.get(name) {
            Some(idx) => Ok(&mut self.categories[*idx]),
            None => Err(StoreError::UnknownCategory(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Option<&str>)]) -> RowMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(Scalar::text)))
            .collect()
    }

    fn entity_store() -> Store {
        let mut store = Store::new();
        let source = store.register_source("1abc.cif");
        store.create_category("entity", &["id", "type"]).unwrap();
        let rows = vec![
            row(&[("id", Some("1")), ("type", Some("polymer"))]),
            row(&[("id", Some("2")), ("type", Some("non-polymer"))]),
            row(&[("id", Some("3"))]),
        ];
        store.ingest("entity", source, &rows).unwrap();
        store
    }

    #[test]
    fn test_duplicate_category() {
        let mut store = Store::new();
        store.create_category("entity", &["id"]).unwrap();
        let err = store.create_category("entity", &["id"]).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCategory(name) if name == "entity"));
    }

    #[test]
    fn test_ingest_assigns_sequential_ids_and_nulls() {
        let store = entity_store();
        let rows: Vec<_> = store.select("entity", &["id", "type"], None).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id.seq, 1);
        assert_eq!(rows[2].id.seq, 3);
        assert_eq!(rows[2].values[1], None);
        assert_eq!(store.source_label(rows[0].id.source), Some("1abc.cif"));
    }

    #[test]
    fn test_ingest_rejects_unknown_item_atomically() {
        let mut store = Store::new();
        let source = store.register_source("a");
        store.create_category("entity", &["id"]).unwrap();
        let rows = vec![row(&[("id", Some("1"))]), row(&[("colour", Some("red"))])];
        let err = store.ingest("entity", source, &rows).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
        assert_eq!(store.category("entity").unwrap().len(), 0);
    }

    #[test]
    fn test_select_missing_category_is_empty() {
        let store = Store::new();
        let mut selection = store.select("nothing", &["id"], None);
        assert!(!selection.category_exists());
        assert!(selection.next().is_none());
    }

    #[test]
    fn test_select_is_restartable_and_filtered() {
        let store = entity_store();
        let filter = RowFilter {
            item: "type".into(),
            condition: FilterCondition::Equals("polymer".into()),
        };
        let selection = store.select("entity", &["id"], Some(&filter));
        assert_eq!(selection.clone().count(), 1);
        assert_eq!(selection.count(), 1);

        let nulls = RowFilter {
            item: "type".into(),
            condition: FilterCondition::IsNull,
        };
        let ids: Vec<_> = store
            .select("entity", &["id"], Some(&nulls))
            .map(|r| r.cells())
            .collect();
        assert_eq!(ids, vec![vec![Some(Scalar::text("3"))]]);
    }

    #[test]
    fn test_upsert_distinct_and_append() {
        let mut store = Store::new();
        let rows = vec![
            DerivedRow::new(SourceId(1), vec![Some(Scalar::text("A"))]),
            DerivedRow::new(SourceId(1), vec![Some(Scalar::text("A"))]),
            DerivedRow::new(SourceId(2), vec![Some(Scalar::text("B"))]),
        ];
        assert_eq!(store.upsert("residue", &["code"], rows.clone(), true).unwrap(), 2);
        assert_eq!(store.upsert("residue", &["code"], rows.clone(), true).unwrap(), 0);
        assert_eq!(store.upsert("residue", &["code"], rows, false).unwrap(), 3);
        assert_eq!(store.category("residue").unwrap().len(), 5);
        assert_eq!(store.category("residue").unwrap().origin(), Origin::Derived);
    }

    #[test]
    fn test_distinct_values_first_seen_order() {
        let mut store = entity_store();
        let source = store.register_source("2xyz.cif");
        let rows = vec![row(&[("id", Some("1")), ("type", Some("polymer"))])];
        store.ingest("entity", source, &rows).unwrap();

        let values = store.distinct_values("entity", &["type"]);
        assert_eq!(
            values,
            vec![
                vec![Some(Scalar::text("polymer"))],
                vec![Some(Scalar::text("non-polymer"))],
                vec![None],
            ]
        );
    }

    #[test]
    fn test_update_item_only_on_derived() {
        let mut store = entity_store();
        let err = store.update_item("entity", 0, "type", None).unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyCategory(_)));

        store
            .upsert("sample", &["id"], vec![DerivedRow::new(SourceId(1), vec![None])], false)
            .unwrap();
        store
            .update_item("sample", 0, "id", Some(Scalar::Integer(1)))
            .unwrap();
        assert_eq!(
            store.category("sample").unwrap().value(0, "id"),
            Some(&Scalar::Integer(1))
        );
    }
}
