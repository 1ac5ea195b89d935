//! Entry dumps and grouping manifests.
//!
//! Parsing the structural file format is done upstream. The engine reads
//! its output: one JSON dump per entry, listing categories and rows in
//! file order.
//!
//! ```json
//! {
//!   "entry_id": "1abc",
//!   "group_id": "G_1",
//!   "categories": [
//!     { "name": "entity", "items": ["id", "type"], "rows": [{ "id": "1", "type": "polymer" }] }
//!   ]
//! }
//! ```
//!
//! Batch runs take a CSV manifest with `GROUP_ID` and `ENTRY_ID` columns.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::models::RowMap;

/// Rows of one category as produced by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRows {
    pub name: String,

    /// Declared item schema. Derived from the rows when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,

    #[serde(default)]
    pub rows: Vec<RowMap>,
}

impl CategoryRows {
    /// Item schema: the declared items, else every item seen in the rows
    /// in first-seen order.
    pub fn schema(&self) -> Vec<String> {
        if let Some(items) = &self.items {
            return items.clone();
        }
        let mut items: Vec<String> = Vec::new();
        for row in &self.rows {
            for item in row.keys() {
                if !items.contains(item) {
                    items.push(item.clone());
                }
            }
        }
        items
    }
}

/// One parsed entry: the rows of every category of its source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySource {
    pub entry_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(default)]
    pub categories: Vec<CategoryRows>,
}

impl EntrySource {
    /// Parse an entry dump. Values must be strings, numbers or null.
    pub fn from_json(json: &str) -> AcquisitionResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Group this entry belongs to; an ungrouped entry is its own group.
    pub fn group_key(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.entry_id)
    }

    /// Total number of rows over all categories.
    pub fn row_count(&self) -> usize {
        self.categories.iter().map(|c| c.rows.len()).sum()
    }
}

/// Read an entry dump file
pub fn load_entry_file(path: impl AsRef<Path>) -> AcquisitionResult<EntrySource> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| AcquisitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    EntrySource::from_json(&json)
}

/// Location of an entry's dump inside a dump directory.
pub fn entry_dump_path(dump_dir: &Path, entry_id: &str) -> PathBuf {
    dump_dir.join(format!("{}.json", entry_id))
}

/// Load the dumps of several entries from a dump directory.
///
/// Fails on the first entry that is missing or unreadable.
pub fn load_entries(dump_dir: &Path, entry_ids: &[String]) -> AcquisitionResult<Vec<EntrySource>> {
    entry_ids
        .iter()
        .map(|entry_id| {
            let path = entry_dump_path(dump_dir, entry_id);
            if !path.is_file() {
                return Err(AcquisitionError::MissingEntry(entry_id.clone()));
            }
            load_entry_file(&path)
        })
        .collect()
}

/// One line of a grouping manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "GROUP_ID", default)]
    pub group_id: Option<String>,

    #[serde(rename = "ENTRY_ID")]
    pub entry_id: String,
}

impl ManifestEntry {
    pub fn group_key(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.entry_id)
    }
}

/// Parse a grouping manifest from any CSV source.
pub fn parse_manifest<R: Read>(reader: R) -> AcquisitionResult<Vec<ManifestEntry>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut entries = Vec::new();
    for record in csv_reader.deserialize() {
        let entry: ManifestEntry = record?;
        if !entry.entry_id.is_empty() {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Read a grouping manifest file
pub fn read_manifest(path: impl AsRef<Path>) -> AcquisitionResult<Vec<ManifestEntry>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| AcquisitionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scalar;
    use std::io::Write;

    const DUMP: &str = r#"{
        "entry_id": "1abc",
        "group_id": "G_1",
        "categories": [
            { "name": "entity", "rows": [{ "id": "1", "type": "polymer" }, { "id": 2, "src": null }] },
            { "name": "exptl", "items": ["method"], "rows": [] }
        ]
    }"#;

    #[test]
    fn test_parse_dump() {
        let entry = EntrySource::from_json(DUMP).unwrap();
        assert_eq!(entry.group_key(), "G_1");
        assert_eq!(entry.row_count(), 2);
        assert_eq!(entry.categories[0].schema(), vec!["id", "type", "src"]);
        assert_eq!(entry.categories[1].schema(), vec!["method"]);
        assert_eq!(entry.categories[0].rows[1]["id"], Some(Scalar::Integer(2)));
    }

    #[test]
    fn test_nested_value_rejected() {
        let err = EntrySource::from_json(
            r#"{"entry_id": "1abc", "categories": [{"name": "entity", "rows": [{"id": {"x": 1}}]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AcquisitionError::Json(_)));
    }

    #[test]
    fn test_manifest_groups_and_blank_group() {
        let csv = "GROUP_ID,ENTRY_ID\nG_1,1abc\nG_1, 2xyz\n,3def\n";
        let entries = parse_manifest(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].entry_id, "2xyz");
        assert_eq!(entries[2].group_id, None);
        assert_eq!(entries[2].group_key(), "3def");
    }

    #[test]
    fn test_load_entries_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(entry_dump_path(dir.path(), "1abc")).unwrap();
        file.write_all(DUMP.as_bytes()).unwrap();

        let entries = load_entries(dir.path(), &["1abc".to_string()]).unwrap();
        assert_eq!(entries[0].entry_id, "1abc");

        let err = load_entries(dir.path(), &["1abc".to_string(), "9zzz".to_string()]).unwrap_err();
        assert!(matches!(err, AcquisitionError::MissingEntry(id) if id == "9zzz"));
    }
}
