//! Operation file definition.
//!
//! The operation file is the externally configured pipeline: an ordered
//! list of source→target operations plus the designated output categories
//! and their item order. It is loaded in three passes, all before any row
//! is ingested:
//!
//! 1. JSON Schema (shape, see [`crate::validation`])
//! 2. serde into [`OperationDocument`]
//! 3. compilation into [`Operation`]s (known kind, item arity, parameters,
//!    regex patterns)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::operations::{Operation, OperationKind, Step};
use crate::error::{ConfigError, ConfigResult};
use crate::models::{Cell, Scalar};
use crate::store::{FilterCondition, RowFilter};
use crate::validation::validate_operation_document;

fn default_version() -> String {
    "1.0".to_string()
}

fn default_delimiter() -> String {
    " ".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The operation file as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDocument {
    /// Version of the operation file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Operations, executed in this order
    pub operations: Vec<OperationSpec>,

    /// Categories handed to the renderer. All derived categories when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_categories: Option<Vec<String>>,

    /// Leading item order per output category
    #[serde(default, alias = "mmcif_order", skip_serializing_if = "BTreeMap::is_empty")]
    pub item_order: BTreeMap<String, Vec<String>>,
}

/// One operation as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Operation kind name
    pub operation: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_category: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_items: Vec<String>,

    pub target_category: String,

    pub target_items: Vec<String>,

    #[serde(default, alias = "operation_parameters", skip_serializing_if = "OperationParameters::is_empty")]
    pub parameters: OperationParameters,
}

/// Optional parameters. Which ones apply depends on the kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,

    /// Literal for `default_fill`, or for every item of `static_value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// One literal per target item of `static_value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_items: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub distinct: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterSpec>,
}

impl OperationParameters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Source row filter as written. Exactly one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    pub item: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
}

/// A loaded, validated operation file.
///
/// Immutable once built; shared between workers behind an `Arc`.
#[derive(Debug, Clone)]
pub struct OperationList {
    document: OperationDocument,
    operations: Vec<Operation>,
}

impl OperationList {
    /// Compile a deserialized document.
    pub fn new(document: OperationDocument) -> ConfigResult<Self> {
        let operations = document
            .operations
            .iter()
            .enumerate()
            .map(|(index, spec)| compile(index, spec))
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self {
            document,
            operations,
        })
    }

    /// Parse an operation file from a JSON string
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Parse an operation file from a JSON value
    pub fn from_value(value: &Value) -> ConfigResult<Self> {
        validate_operation_document(value).map_err(|errors| ConfigError::Schema { errors })?;
        let document: OperationDocument = serde_json::from_value(value.clone())?;
        Self::new(document)
    }

    /// Read and parse an operation file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.document)
    }

    pub fn document(&self) -> &OperationDocument {
        &self.document
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn description(&self) -> &str {
        &self.document.description
    }

    /// Designated output categories, if the file names them.
    pub fn output_categories(&self) -> Option<&[String]> {
        self.document.output_categories.as_deref()
    }

    /// Leading item order for a category (empty when unspecified).
    pub fn item_order(&self, category: &str) -> &[String] {
        self.document
            .item_order
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Categories read by operations, sorted and deduplicated.
    pub fn source_categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .operations
            .iter()
            .filter(|op| op.kind().reads_source())
            .map(|op| op.source_category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Categories written by operations, in first-written order.
    pub fn target_categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = Vec::new();
        for op in &self.operations {
            if op.kind() != OperationKind::Noop && !categories.contains(&op.target_category) {
                categories.push(op.target_category.clone());
            }
        }
        categories
    }
}

/// Validate one operation against the rules of its kind.
fn compile(index: usize, spec: &OperationSpec) -> ConfigResult<Operation> {
    let kind = OperationKind::parse(&spec.operation).ok_or_else(|| ConfigError::UnknownOperation {
        index,
        name: spec.operation.clone(),
    })?;
    let invalid = |message: String| ConfigError::InvalidOperation {
        index,
        kind: kind.to_string(),
        message,
    };
    let params = &spec.parameters;
    let sources = spec.source_items.len();
    let targets = spec.target_items.len();

    if kind.reads_source() {
        if spec.source_category.is_empty() {
            return Err(invalid("source_category is required".into()));
        }
        if sources == 0 {
            return Err(invalid("source_items must not be empty".into()));
        }
    }
    if kind != OperationKind::Noop && targets == 0 {
        return Err(invalid("target_items must not be empty".into()));
    }
    if let Some(item) = first_duplicate(&spec.target_items) {
        return Err(invalid(format!("target item '{}' is listed more than once", item)));
    }

    let same_arity = || {
        if sources == targets {
            Ok(())
        } else {
            Err(invalid(format!(
                "expected as many target items as source items ({} source, {} target)",
                sources, targets
            )))
        }
    };
    let single_target = || {
        if targets == 1 {
            Ok(())
        } else {
            Err(invalid(format!("expected exactly one target item, found {}", targets)))
        }
    };

    let filter = match &params.filter {
        Some(_) if !kind.reads_source() => {
            return Err(invalid("filter is not supported for this operation".into()));
        }
        Some(filter) => Some(compile_filter(filter).map_err(|e| match e {
            FilterProblem::Pattern(source) => ConfigError::InvalidPattern { index, source },
            FilterProblem::Shape(message) => invalid(message),
        })?),
        None => None,
    };

    let step = match kind {
        OperationKind::DirectTransfer => {
            same_arity()?;
            Step::DirectTransfer
        }
        OperationKind::Concatenate => {
            single_target()?;
            Step::Concatenate {
                delimiter: params.delimiter.clone().unwrap_or_else(default_delimiter),
            }
        }
        OperationKind::Split => {
            same_arity()?;
            Step::Split {
                delimiter: delimiter_of(params).map_err(invalid)?,
            }
        }
        OperationKind::DistinctGroup => {
            same_arity()?;
            let group_by = match &params.group_by {
                None => (0..sources).collect(),
                Some(keys) => keys
                    .iter()
                    .map(|key| {
                        spec.source_items.iter().position(|s| s == key).ok_or_else(|| {
                            invalid(format!("group_by item '{}' is not a source item", key))
                        })
                    })
                    .collect::<ConfigResult<Vec<_>>>()?,
            };
            if group_by.is_empty() {
                return Err(invalid("group_by must not be empty".into()));
            }
            Step::DistinctGroup { group_by }
        }
        OperationKind::Lookup => {
            let lookup_category = params
                .lookup_category
                .clone()
                .ok_or_else(|| invalid("lookup_category is required".into()))?;
            let join_key = params
                .join_key
                .clone()
                .ok_or_else(|| invalid("join_key is required".into()))?;
            let lookup_items = params.lookup_items.clone().unwrap_or_default();
            if lookup_items.is_empty() {
                return Err(invalid("lookup_items must not be empty".into()));
            }
            if targets != sources + lookup_items.len() {
                return Err(invalid(format!(
                    "expected {} target items (source items followed by lookup items), found {}",
                    sources + lookup_items.len(),
                    targets
                )));
            }
            Step::Lookup {
                lookup_category,
                lookup_key: params.lookup_key.clone().unwrap_or_else(|| join_key.clone()),
                join_key,
                lookup_items,
            }
        }
        OperationKind::DefaultFill => {
            same_arity()?;
            let value = match &params.value {
                Some(value) => Scalar::from_json(value).map_err(invalid)?,
                None => None,
            };
            let value = value.ok_or_else(|| invalid("value is required".into()))?;
            Step::DefaultFill { value }
        }
        OperationKind::StaticValue => {
            let values: Vec<Cell> = match (&params.values, &params.value) {
                (Some(values), _) => {
                    if values.len() != targets {
                        return Err(invalid(format!(
                            "expected {} values, found {}",
                            targets,
                            values.len()
                        )));
                    }
                    values
                        .iter()
                        .map(Scalar::from_json)
                        .collect::<Result<_, _>>()
                        .map_err(invalid)?
                }
                (None, Some(value)) => vec![Scalar::from_json(value).map_err(invalid)?; targets],
                (None, None) => return Err(invalid("value or values is required".into())),
            };
            Step::StaticValue { values }
        }
        OperationKind::AutoIncrement => {
            single_target()?;
            Step::AutoIncrement {
                group_by: params.group_by.clone().unwrap_or_default(),
            }
        }
        OperationKind::Noop => Step::Noop,
    };

    Ok(Operation {
        index,
        step,
        source_category: spec.source_category.clone(),
        source_items: spec.source_items.clone(),
        target_category: spec.target_category.clone(),
        target_items: spec.target_items.clone(),
        filter,
        distinct: params.distinct,
    })
}

/// First name that occurs twice, if any.
fn first_duplicate(items: &[String]) -> Option<&str> {
    items
        .iter()
        .enumerate()
        .find(|(i, item)| items[..*i].contains(item))
        .map(|(_, item)| item.as_str())
}

fn delimiter_of(params: &OperationParameters) -> Result<String, String> {
    match &params.delimiter {
        Some(d) if d.is_empty() => Err("delimiter must not be empty".into()),
        Some(d) => Ok(d.clone()),
        None => Ok(default_delimiter()),
    }
}

enum FilterProblem {
    Shape(String),
    Pattern(regex::Error),
}

fn compile_filter(spec: &FilterSpec) -> Result<RowFilter, FilterProblem> {
    let condition = match (&spec.equals, &spec.matches, spec.is_null) {
        (Some(value), None, None) => match Scalar::from_json(value).map_err(FilterProblem::Shape)? {
            Some(scalar) => FilterCondition::Equals(scalar.render().into_owned()),
            None => FilterCondition::IsNull,
        },
        (None, Some(pattern), None) => {
            FilterCondition::Matches(regex::Regex::new(pattern).map_err(FilterProblem::Pattern)?)
        }
        (None, None, Some(true)) => FilterCondition::IsNull,
        (None, None, Some(false)) => FilterCondition::NotNull,
        _ => {
            return Err(FilterProblem::Shape(
                "filter needs exactly one of equals, matches, is_null".into(),
            ))
        }
    };
    Ok(RowFilter {
        item: spec.item.clone(),
        condition,
    })
}

/// Generate an example operation file for documentation
pub fn example_operations() -> OperationDocument {
    fn op(
        operation: &str,
        source: (&str, &[&str]),
        target: (&str, &[&str]),
        parameters: OperationParameters,
    ) -> OperationSpec {
        OperationSpec {
            operation: operation.to_string(),
            source_category: source.0.to_string(),
            source_items: source.1.iter().map(|s| s.to_string()).collect(),
            target_category: target.0.to_string(),
            target_items: target.1.iter().map(|s| s.to_string()).collect(),
            parameters,
        }
    }

    let operations = vec![
        // Investigation id
        op(
            "direct_transfer",
            ("_investigation", &["id"]),
            ("investigation", &["id"]),
            OperationParameters::default(),
        ),
        // One sample per polymer entity
        op(
            "concatenate",
            ("entity", &["pdb_id", "id"]),
            ("sample", &["name"]),
            OperationParameters {
                delimiter: Some("_".into()),
                distinct: true,
                filter: Some(FilterSpec {
                    item: "type".into(),
                    equals: Some(Value::String("polymer".into())),
                    matches: None,
                    is_null: None,
                }),
                ..Default::default()
            },
        ),
        op(
            "auto_increment",
            ("", &[]),
            ("sample", &["id"]),
            OperationParameters::default(),
        ),
        // Residues of each polymer sequence
        op(
            "split",
            ("entity_poly", &["pdbx_seq_one_letter_code_can", "entity_id"]),
            ("residue", &["code", "entity_id"]),
            OperationParameters {
                delimiter: Some(" ".into()),
                ..Default::default()
            },
        ),
        // Unique ligands with their InChIKey
        op(
            "distinct_group",
            ("chem_comp", &["id", "name", "type"]),
            ("ligand", &["comp_id", "name", "type"]),
            OperationParameters {
                group_by: Some(vec!["id".into()]),
                ..Default::default()
            },
        ),
        op(
            "lookup",
            ("ligand", &["comp_id"]),
            ("ligand_inchi", &["comp_id", "inchikey"]),
            OperationParameters {
                lookup_category: Some("chem_comp_inchi".into()),
                join_key: Some("comp_id".into()),
                lookup_key: Some("CHEM_COMP_ID".into()),
                lookup_items: Some(vec!["DESCRIPTOR".into()]),
                ..Default::default()
            },
        ),
        op(
            "default_fill",
            ("ligand", &["type"]),
            ("ligand", &["type"]),
            OperationParameters {
                value: Some(Value::String("?".into())),
                ..Default::default()
            },
        ),
    ];

    let mut item_order = BTreeMap::new();
    item_order.insert("sample".to_string(), vec!["id".to_string(), "name".to_string()]);

    OperationDocument {
        version: default_version(),
        description: "Example investigation operations for PDB entries".to_string(),
        operations,
        output_categories: Some(vec![
            "investigation".into(),
            "sample".into(),
            "residue".into(),
            "ligand".into(),
            "ligand_inchi".into(),
        ]),
        item_order,
    }
}
