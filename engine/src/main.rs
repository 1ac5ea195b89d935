//! Investigation CLI - Build investigation files from entry dumps
//!
//! # Main Commands
//!
//! ```bash
//! investigation run dumps/1abc.json dumps/2xyz.json -p operations.json   # One investigation per group
//! investigation batch groups.csv dumps/ -p operations.json               # Manifest-driven batch
//! ```
//!
//! # Operation File Commands
//!
//! ```bash
//! investigation check operations.json    # Validate an operation file
//! investigation operations               # Show available operations
//! investigation example                  # Show example operation file
//! ```

use clap::{Args, Parser, Subcommand};
use investigation::{
    cancel_flag, example_operations, group_entries, group_manifest, load_entry_file,
    operations_description, read_manifest, run_batch, run_groups, BatchOptions, EngineConfig,
    GroupOutcome, OperationList, ReferenceSpec,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "investigation")]
#[command(about = "Build investigation files from denormalized entry records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by `run` and `batch`; each overrides its environment variable.
#[derive(Args)]
struct EngineArgs {
    /// Operation file (INVESTIGATION_OPERATIONS)
    #[arg(short = 'p', long)]
    operations: Option<PathBuf>,

    /// Output directory (INVESTIGATION_OUTPUT_DIR)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Reference table as NAME=PATH, repeatable (INVESTIGATION_REFERENCE)
    #[arg(short, long = "reference")]
    references: Vec<ReferenceSpec>,

    /// Prefix of investigation ids (INVESTIGATION_ID_PREFIX)
    #[arg(long)]
    id_prefix: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform entry dumps; entries sharing a group id form one investigation
    Run {
        /// Entry dump files (JSON)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Transform every group of a GROUP_ID,ENTRY_ID manifest
    Batch {
        /// Grouping manifest (CSV)
        manifest: PathBuf,

        /// Directory holding one {ENTRY_ID}.json dump per entry
        dumps: PathBuf,

        /// Groups transformed in parallel (INVESTIGATION_CONCURRENCY)
        #[arg(short, long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Validate an operation file
    Check {
        /// Operation file (JSON)
        operations: PathBuf,
    },

    /// Show available operations
    Operations,

    /// Show example operation file
    Example,
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { inputs, engine } => cmd_run(&inputs, engine),

        Commands::Batch {
            manifest,
            dumps,
            concurrency,
            engine,
        } => cmd_batch(&manifest, &dumps, concurrency, engine).await,

        Commands::Check { operations } => cmd_check(&operations),

        Commands::Operations => cmd_operations(),

        Commands::Example => cmd_example(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Environment settings overridden by flags.
fn resolve_config(engine: EngineArgs) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::from_env()?;
    if engine.operations.is_some() {
        config.operations = engine.operations;
    }
    if let Some(dir) = engine.output_dir {
        config.output_dir = dir;
    }
    if !engine.references.is_empty() {
        config.references = engine.references;
    }
    if engine.id_prefix.is_some() {
        config.id_prefix = engine.id_prefix;
    }
    Ok(config)
}

fn load_program(config: &EngineConfig) -> Result<Arc<OperationList>, Box<dyn std::error::Error>> {
    let path = config
        .operations
        .as_deref()
        .ok_or("no operation file: pass --operations or set INVESTIGATION_OPERATIONS")?;
    eprintln!("📋 Operations: {}", path.display());
    let program = OperationList::from_file(path)?;
    eprintln!("   {} operations", program.len());
    Ok(Arc::new(program))
}

fn cmd_run(inputs: &[PathBuf], engine: EngineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(engine)?;
    let program = load_program(&config)?;
    let references = Arc::new(config.load_references()?);

    let mut entries = Vec::with_capacity(inputs.len());
    for input in inputs {
        eprintln!("📄 Loading: {}", input.display());
        entries.push(load_entry_file(input)?);
    }

    let groups = group_entries(entries);
    eprintln!("\n⚙️  {} investigations", groups.len());

    let options = BatchOptions::from(&config);
    let outcomes = run_groups(groups, program, references, &options);

    let mut failed = 0;
    for outcome in &outcomes {
        match outcome {
            GroupOutcome::Completed(output) => {
                let (document, report) = output.write_to(&config.output_dir)?;
                eprintln!(
                    "   💾 {} ({} skips in {})",
                    document.display(),
                    output.report.skipped.len(),
                    report.display()
                );
            }
            GroupOutcome::Failed { group_id, error } => {
                failed += 1;
                eprintln!("   ❌ {}: {}", group_id, error);
            }
            GroupOutcome::Cancelled { .. } => {}
        }
    }

    if failed > 0 {
        eprintln!("\n⚠️  {} investigations failed", failed);
        std::process::exit(1);
    }

    eprintln!("\n✨ Done!");
    Ok(())
}

async fn cmd_batch(
    manifest: &Path,
    dumps: &Path,
    concurrency: Option<usize>,
    engine: EngineArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = resolve_config(engine)?;
    if let Some(n) = concurrency {
        config.concurrency = n.max(1);
    }
    let program = load_program(&config)?;
    let references = Arc::new(config.load_references()?);

    eprintln!("📄 Manifest: {}", manifest.display());
    let groups = group_manifest(read_manifest(manifest)?);
    eprintln!("   {} groups", groups.len());

    // Ctrl-C stops groups that have not started
    let cancel = cancel_flag();
    let signal_flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Interrupted: finishing running groups, skipping the rest");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let options = BatchOptions::from(&config);
    let outcomes = run_batch(groups, dumps, program, references, &options, cancel).await;

    let mut failed = 0;
    for outcome in &outcomes {
        match outcome {
            GroupOutcome::Completed(output) => {
                output.write_to(&config.output_dir)?;
            }
            GroupOutcome::Failed { group_id, error } => {
                failed += 1;
                eprintln!("   ❌ {}: {}", group_id, error);
            }
            GroupOutcome::Cancelled { .. } => {}
        }
    }

    eprintln!(
        "\n📊 Results: {} written to {}, {} failed",
        outcomes.iter().filter(|o| o.is_completed()).count(),
        config.output_dir.display(),
        failed
    );

    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Checking: {}", path.display());

    let program = OperationList::from_file(path)?;
    for op in program.operations() {
        eprintln!("   {}", op.describe());
    }
    if let Some(outputs) = program.output_categories() {
        eprintln!("   Output: {}", outputs.join(", "));
    }

    eprintln!("✅ {} operations valid", program.len());
    Ok(())
}

fn cmd_operations() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", operations_description());
    Ok(())
}

fn cmd_example() -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&example_operations())?;
    println!("{}", json);
    Ok(())
}
