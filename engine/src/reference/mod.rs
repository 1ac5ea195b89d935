//! Shared read-only reference tables.
//!
//! A reference table (e.g. chemical component id → InChIKey descriptor) is
//! loaded once from CSV before any invocation starts, wrapped in an `Arc`
//! and read by every worker without synchronization. `lookup` operations
//! address it by name, like any store category.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::models::{Category, Origin, RowMap, Scalar, SourceId};

/// Named reference tables. Immutable once built.
#[derive(Debug, Default)]
pub struct ReferenceTables {
    tables: BTreeMap<String, Category>,
}

impl ReferenceTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a CSV file (with header row) as table `name`.
    pub fn load_csv(&mut self, name: &str, path: impl AsRef<Path>) -> AcquisitionResult<usize> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| AcquisitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = read_csv(name, file).map_err(|e| match e {
            AcquisitionError::NoHeaders(_) => AcquisitionError::NoHeaders(path.to_path_buf()),
            other => other,
        })?;
        let rows = table.len();
        self.tables.insert(name.to_string(), table);
        Ok(rows)
    }

    /// Add a table read from any CSV source.
    pub fn insert_csv<R: Read>(&mut self, name: &str, reader: R) -> AcquisitionResult<usize> {
        let table = read_csv(name, reader)?;
        let rows = table.len();
        self.tables.insert(name.to_string(), table);
        Ok(rows)
    }

    /// A table by name.
    pub fn get(&self, name: &str) -> Option<&Category> {
        self.tables.get(name)
    }

    /// Table names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Read CSV into a reference category. Empty and missing trailing fields
/// are null; a record longer than the header is rejected.
fn read_csv<R: Read>(name: &str, reader: R) -> AcquisitionResult<Category> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(AcquisitionError::NoHeaders(name.into()));
    }

    let mut category = Category::new(name, &headers, Origin::Reference);
    for record in csv_reader.records() {
        let record = record?;
        if record.len() > headers.len() {
            return Err(AcquisitionError::ExtraFields {
                table: name.to_string(),
                line: record.position().map_or(0, |p| p.line()),
                fields: record.len(),
                expected: headers.len(),
            });
        }
        let row: RowMap = headers
            .iter()
            .zip(record.iter())
            .map(|(header, field)| {
                let value = if field.is_empty() { None } else { Some(Scalar::text(field)) };
                (header.clone(), value)
            })
            .collect();
        let cells = category.align(&row).unwrap_or_default();
        category.push(SourceId::SYNTHETIC, cells);
    }
    Ok(category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INCHI_CSV: &str = "CHEM_COMP_ID,DESCRIPTOR\nATP,ZKHQWZAMYRWXGA-KQYNXXCUSA-N\nHOH,XLYOFNOQVPJJNP-UHFFFAOYSA-N\nUNK,\n";

    #[test]
    fn test_insert_csv() {
        let mut tables = ReferenceTables::new();
        let rows = tables.insert_csv("chem_comp_inchi", INCHI_CSV.as_bytes()).unwrap();
        assert_eq!(rows, 3);

        let table = tables.get("chem_comp_inchi").unwrap();
        assert_eq!(table.origin(), Origin::Reference);
        assert_eq!(table.items(), ["CHEM_COMP_ID", "DESCRIPTOR"]);
        assert_eq!(
            table.value(1, "DESCRIPTOR"),
            Some(&Scalar::text("XLYOFNOQVPJJNP-UHFFFAOYSA-N"))
        );
        assert_eq!(table.value(2, "DESCRIPTOR"), None);
    }

    #[test]
    fn test_short_rows_pad_and_long_rows_fail() {
        let mut tables = ReferenceTables::new();
        tables
            .insert_csv("inchi", "CHEM_COMP_ID,DESCRIPTOR\nATP\n".as_bytes())
            .unwrap();
        assert_eq!(tables.get("inchi").unwrap().value(0, "DESCRIPTOR"), None);

        let err = tables
            .insert_csv("inchi", "CHEM_COMP_ID,DESCRIPTOR\nATP,KEY-A\nHEM,KEY-B,extra\n".as_bytes())
            .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::ExtraFields { line: 3, fields: 3, expected: 2, ref table } if table == "inchi"
        ));
    }

    #[test]
    fn test_load_csv_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(INCHI_CSV.as_bytes()).unwrap();

        let mut tables = ReferenceTables::new();
        tables.load_csv("inchi", file.path()).unwrap();
        assert_eq!(tables.names().collect::<Vec<_>>(), vec!["inchi"]);
        assert!(!tables.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let mut tables = ReferenceTables::new();
        let err = tables.load_csv("inchi", "/nonexistent/inchi.csv").unwrap_err();
        assert!(matches!(err, AcquisitionError::Io { .. }));
    }
}
