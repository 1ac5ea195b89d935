//! Engine settings.
//!
//! Read from the environment (a `.env` file is loaded first when present)
//! and overridden by command-line flags.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `INVESTIGATION_OPERATIONS` | Operation file | - |
//! | `INVESTIGATION_OUTPUT_DIR` | Output directory | `output` |
//! | `INVESTIGATION_CONCURRENCY` | Groups transformed in parallel | available cores |
//! | `INVESTIGATION_REFERENCE` | Reference tables, `NAME=PATH[,NAME=PATH]` | - |
//! | `INVESTIGATION_ID_PREFIX` | Prefix of investigation ids | - |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{AcquisitionResult, ConfigError, ConfigResult};
use crate::logs::log_info;
use crate::reference::ReferenceTables;

pub const ENV_OPERATIONS: &str = "INVESTIGATION_OPERATIONS";
pub const ENV_OUTPUT_DIR: &str = "INVESTIGATION_OUTPUT_DIR";
pub const ENV_CONCURRENCY: &str = "INVESTIGATION_CONCURRENCY";
pub const ENV_REFERENCE: &str = "INVESTIGATION_REFERENCE";
pub const ENV_ID_PREFIX: &str = "INVESTIGATION_ID_PREFIX";

/// A reference table to load: `NAME=PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSpec {
    pub name: String,
    pub path: PathBuf,
}

impl FromStr for ReferenceSpec {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ConfigError::InvalidSetting {
            key: ENV_REFERENCE.to_string(),
            message: format!("'{}': {}", value, message),
        };
        let (name, path) = value.split_once('=').ok_or_else(|| invalid("expected NAME=PATH"))?;
        let (name, path) = (name.trim(), path.trim());
        if name.is_empty() || path.is_empty() {
            return Err(invalid("name and path must not be empty"));
        }
        Ok(Self {
            name: name.to_string(),
            path: PathBuf::from(path),
        })
    }
}

/// Settings of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub operations: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub references: Vec<ReferenceSpec>,
    pub id_prefix: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operations: None,
            output_dir: PathBuf::from("output"),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            references: Vec::new(),
            id_prefix: None,
        }
    }
}

impl EngineConfig {
    /// Settings from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        // Try loading .env file
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Settings from any key lookup; unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_OPERATIONS) {
            config.operations = Some(PathBuf::from(path));
        }
        if let Some(dir) = get(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(value) = get(ENV_CONCURRENCY) {
            config.concurrency = parse_concurrency(&value)?;
        }
        if let Some(value) = get(ENV_REFERENCE) {
            config.references = value
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<ConfigResult<Vec<_>>>()?;
        }
        config.id_prefix = get(ENV_ID_PREFIX);
        Ok(config)
    }

    /// Load every configured reference table.
    pub fn load_references(&self) -> AcquisitionResult<ReferenceTables> {
        let mut tables = ReferenceTables::new();
        for reference in &self.references {
            let rows = tables.load_csv(&reference.name, &reference.path)?;
            log_info(format!(
                "Reference table '{}': {} rows from {}",
                reference.name,
                rows,
                reference.path.display()
            ));
        }
        Ok(tables)
    }
}

/// Investigation id of a group: the group id behind an optional prefix.
pub fn investigation_id(prefix: Option<&str>, group_id: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}{}", prefix, group_id),
        None => group_id.to_string(),
    }
}

/// Parse a worker count (at least 1).
pub fn parse_concurrency(value: &str) -> ConfigResult<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidSetting {
            key: ENV_CONCURRENCY.to_string(),
            message: format!("'{}' is not a positive integer", value),
        }),
    }
}
