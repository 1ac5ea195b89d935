//! Pipeline runner: entries in, investigation files out.
//!
//! One invocation builds one store from every entry of a group, runs the
//! operation list once, and projects the output categories. Invocations
//! are independent; only the operation list and the reference tables are
//! shared, read-only, behind `Arc`s.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use investigation::pipeline::{run_batch, BatchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let program = Arc::new(OperationList::from_file("operations.json")?);
//!     let groups = group_manifest(read_manifest("groups.csv")?);
//!     let outcomes = run_batch(
//!         groups,
//!         Path::new("dumps"),
//!         program,
//!         Arc::new(ReferenceTables::new()),
//!         &BatchOptions::default(),
//!         cancel_flag(),
//!     )
//!     .await;
//!     println!("{} groups", outcomes.len());
//!     Ok(())
//! }
//! ```

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::dsl::{Interpreter, OperationList};
use super::grouper::EntryGroup;
use crate::config::{investigation_id, EngineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::input::{load_entries, EntrySource};
use crate::logs::{log_error, log_for, log_info, log_success, log_warning, LogEntry};
use crate::models::{RowMap, Scalar};
use crate::output::{OutputDocument, RunReport};
use crate::reference::ReferenceTables;

/// Built-in category exposing the investigation id to operations.
pub const INVESTIGATION_CATEGORY: &str = "_investigation";

/// Output of one completed invocation.
#[derive(Debug, Clone)]
pub struct InvestigationOutput {
    pub document: OutputDocument,
    pub report: RunReport,
}

impl InvestigationOutput {
    pub fn investigation_id(&self) -> &str {
        &self.document.investigation_id
    }

    /// Write `{id}.json` and `{id}.skips.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> PipelineResult<(PathBuf, PathBuf)> {
        check_investigation_id(self.investigation_id())?;
        std::fs::create_dir_all(dir)?;
        let document_path = dir.join(format!("{}.json", self.investigation_id()));
        let report_path = dir.join(format!("{}.skips.json", self.investigation_id()));
        std::fs::write(&document_path, self.document.to_json().map_err(std::io::Error::from)?)?;
        std::fs::write(&report_path, self.report.to_json().map_err(std::io::Error::from)?)?;
        Ok((document_path, report_path))
    }
}

/// Investigation ids name output files: no separators, no `..`.
pub fn check_investigation_id(id: &str) -> PipelineResult<()> {
    let unsafe_name = id.is_empty()
        || id.contains(['/', '\\', '\0'])
        || id.contains("..")
        || Path::new(id).is_absolute();
    if unsafe_name {
        Err(PipelineError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

/// Run one invocation over the entries of a group.
///
/// Fails only for store contract violations (duplicate category, schema
/// mismatch), an id that is not a plain file name, or an empty group;
/// missing data ends up in the report.
pub fn run_group(
    investigation_id: &str,
    entries: &[EntrySource],
    program: Arc<OperationList>,
    references: Arc<ReferenceTables>,
) -> PipelineResult<InvestigationOutput> {
    check_investigation_id(investigation_id)?;
    if entries.is_empty() {
        return Err(PipelineError::EmptyInput(investigation_id.to_string()));
    }
    let invocation_id = Uuid::new_v4();
    let started_at = Utc::now();
    let log = |entry: LogEntry| log_for(investigation_id, entry);

    log(LogEntry::info(format!(
        "Building store from {} entries (invocation {})",
        entries.len(),
        invocation_id
    )));

    let mut interpreter = Interpreter::new(Arc::clone(&program), references);
    let mut builtin = RowMap::new();
    builtin.insert("id".to_string(), Some(Scalar::text(investigation_id)));
    interpreter.add_builtin(INVESTIGATION_CATEGORY, &builtin)?;

    for entry in entries {
        interpreter.ingest(entry)?;
        log(LogEntry::info(format!("{}: {} rows", entry.entry_id, entry.row_count())).with_indent(1));
    }

    log(LogEntry::info(format!("Running {} operations", program.len())));
    interpreter.transform()?;
    let (store, result) = interpreter.finish()?;
    for skip in &result.skipped {
        let row = skip
            .row
            .map(|r| match store.source_label(r.source) {
                Some(entry) => format!(" row {} of {}", r, entry),
                None => format!(" row {}", r),
            })
            .unwrap_or_default();
        log(LogEntry::warning(format!(
            "#{} {} skipped{}: {}",
            skip.operation_index, skip.operation, row, skip.reason
        ))
        .with_indent(1));
    }
    log(LogEntry::info(result.summary()));

    let document = OutputDocument::project(investigation_id, &store, &program);
    for missing in &document.missing_categories {
        log(LogEntry::warning(format!("Output category '{}' was not produced", missing)).with_indent(1));
    }

    let entry_ids = entries.iter().map(|e| e.entry_id.clone()).collect();
    let report = RunReport::new(investigation_id, invocation_id, entry_ids, started_at, result);
    log(LogEntry::success(format!(
        "{} output categories, {} skip records",
        document.categories.len(),
        report.skipped.len()
    )));

    Ok(InvestigationOutput { document, report })
}

// =============================================================================
// Batch
// =============================================================================

/// Options for a batch run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Groups transformed in parallel
    pub concurrency: usize,
    /// Prefix of investigation ids
    pub id_prefix: Option<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            id_prefix: None,
        }
    }
}

impl From<&EngineConfig> for BatchOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            id_prefix: config.id_prefix.clone(),
        }
    }
}

/// Set to stop groups that have not started yet.
pub type CancelFlag = Arc<AtomicBool>;

pub fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

/// What happened to one group of a batch.
#[derive(Debug)]
pub enum GroupOutcome {
    Completed(InvestigationOutput),
    Failed { group_id: String, error: PipelineError },
    Cancelled { group_id: String },
}

impl GroupOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, GroupOutcome::Completed(_))
    }

    pub fn group_id(&self) -> &str {
        match self {
            GroupOutcome::Completed(output) => &output.document.investigation_id,
            GroupOutcome::Failed { group_id, .. } | GroupOutcome::Cancelled { group_id } => group_id,
        }
    }
}

/// Transform already loaded groups one after another.
///
/// Groups are independent: a failing group is reported as
/// [`GroupOutcome::Failed`] and the remaining groups still run.
pub fn run_groups(
    groups: Vec<EntryGroup<EntrySource>>,
    program: Arc<OperationList>,
    references: Arc<ReferenceTables>,
    options: &BatchOptions,
) -> Vec<GroupOutcome> {
    groups
        .into_iter()
        .map(|group| {
            let id = investigation_id(options.id_prefix.as_deref(), &group.group_id);
            match run_group(&id, &group.members, Arc::clone(&program), Arc::clone(&references)) {
                Ok(output) => GroupOutcome::Completed(output),
                Err(error) => {
                    log_error(format!("{} failed: {}", id, error));
                    GroupOutcome::Failed { group_id: id, error }
                }
            }
        })
        .collect()
}

/// Transform every group, at most `concurrency` at a time.
///
/// Each group loads its entry dumps and runs on a blocking worker with its
/// own store. Outcomes come back in input order. A failing group never
/// affects the others; once `cancel` is set, groups not yet started are
/// reported as cancelled while running ones complete.
pub async fn run_batch(
    groups: Vec<EntryGroup<String>>,
    dump_dir: &Path,
    program: Arc<OperationList>,
    references: Arc<ReferenceTables>,
    options: &BatchOptions,
    cancel: CancelFlag,
) -> Vec<GroupOutcome> {
    let total = groups.len();
    let done = Arc::new(AtomicUsize::new(0));
    log_info(format!(
        "Batch: {} groups, {} workers",
        total,
        options.concurrency.max(1)
    ));

    let outcomes: Vec<GroupOutcome> = stream::iter(groups)
        .map(|group| {
            let program = Arc::clone(&program);
            let references = Arc::clone(&references);
            let cancel = Arc::clone(&cancel);
            let done = Arc::clone(&done);
            let dump_dir = dump_dir.to_path_buf();
            let investigation_id = investigation_id(options.id_prefix.as_deref(), &group.group_id);

            async move {
                if cancel.load(Ordering::SeqCst) {
                    return GroupOutcome::Cancelled {
                        group_id: group.group_id,
                    };
                }
                let group_id = group.group_id.clone();
                let task = tokio::task::spawn_blocking(move || -> PipelineResult<InvestigationOutput> {
                    let entries = load_entries(&dump_dir, &group.members)?;
                    run_group(&investigation_id, &entries, program, references)
                });

                let outcome = match task.await {
                    Ok(Ok(output)) => GroupOutcome::Completed(output),
                    Ok(Err(error)) => GroupOutcome::Failed { group_id, error },
                    Err(join_error) => GroupOutcome::Failed {
                        group_id,
                        error: PipelineError::Worker(join_error.to_string()),
                    },
                };
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                match &outcome {
                    GroupOutcome::Failed { group_id, error } => {
                        log_error(format!("[{}/{}] {} failed: {}", finished, total, group_id, error))
                    }
                    _ => log_info(format!("[{}/{}] {} done", finished, total, outcome.group_id())),
                }
                outcome
            }
        })
        .buffered(options.concurrency.max(1))
        .collect()
        .await;

    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    let cancelled = outcomes
        .iter()
        .filter(|o| matches!(o, GroupOutcome::Cancelled { .. }))
        .count();
    let failed = total - completed - cancelled;
    if failed == 0 && cancelled == 0 {
        log_success(format!("Batch complete: {} groups", completed));
    } else {
        log_warning(format!(
            "Batch finished: {} completed, {} failed, {} cancelled",
            completed, failed, cancelled
        ));
    }

    outcomes
}
