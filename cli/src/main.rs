use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scd2_kernel::adapters::json::{self, JsonRecordFile};
use scd2_kernel::audit::{audit_store, EntityFrequency, Severity};
use scd2_kernel::batch::EntityId;
use scd2_kernel::config::EngineConfig;
use scd2_kernel::dimension::{DimensionStore, InMemoryDimensionStore, Version};
use scd2_kernel::pipeline::{run_pipeline, BatchOutcome, PipelineSummary};
use scd2_kernel::replay::{ApplyReport, ReplayEngine};

/// Environment variable holding the log filter.
const LOG_ENV_VAR: &str = "SCD2_LOG";

/// SCD2 dimension table CLI
#[derive(Parser, Debug)]
#[command(name = "scd2")]
#[command(about = "Replay dated batches into a historized dimension table", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a record file and write the resulting table
    Replay {
        /// Path to the source records JSON
        #[arg(long)]
        records: PathBuf,

        /// Path to engine config JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Existing table to continue from
        #[arg(long)]
        table: Option<PathBuf>,

        /// Where to write the resulting table
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Current version of every entity
    Current {
        #[arg(long)]
        table: PathBuf,
    },

    /// Full history of one entity
    Timeline {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        entity: EntityId,
    },

    /// Version of an entity in effect on a date
    AsOf {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        entity: EntityId,

        #[arg(long)]
        date: NaiveDate,
    },

    /// Number of versions per entity
    Frequency {
        #[arg(long)]
        table: PathBuf,
    },

    /// Check a table for history violations
    Audit {
        #[arg(long)]
        table: PathBuf,
    },
}

/// JSON output of the replay command.
#[derive(Debug, Serialize)]
struct ReplayOutput {
    summary: PipelineSummary,
    applied: Vec<ApplyReport>,
    rejected: Vec<RejectedBatch>,
}

#[derive(Debug, Serialize)]
struct RejectedBatch {
    load_date: NaiveDate,
    error: String,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            records,
            config,
            table,
            out,
        } => replay(&records, config.as_deref(), table.as_deref(), out.as_deref()),
        Command::Current { table } => {
            let store = load_table(&table)?;
            print_json(&store.current_snapshot())
        }
        Command::Timeline { table, entity } => {
            let store = load_table(&table)?;
            print_json(&store.timeline(&entity))
        }
        Command::AsOf {
            table,
            entity,
            date,
        } => {
            let store = load_table(&table)?;
            let version: Option<&Version> = store.as_of(&entity, date);
            print_json(&version)
        }
        Command::Frequency { table } => {
            let store = load_table(&table)?;
            let frequency: Vec<EntityFrequency> = store
                .change_frequency()
                .into_iter()
                .map(|(entity_id, versions)| EntityFrequency {
                    entity_id,
                    versions,
                })
                .collect();
            print_json(&frequency)
        }
        Command::Audit { table } => {
            let store = load_table(&table)?;
            let report = audit_store(&store);
            print_json(&report)?;
            if !report.is_clean() {
                bail!("table {} failed audit", table.display());
            }
            Ok(())
        }
    }
}

fn replay(
    records: &Path,
    config: Option<&Path>,
    table: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    // ----------------------------
    // Load engine config
    // ----------------------------
    let config = match config {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json(&data)?
        }
        None => EngineConfig::default(),
    };

    // ----------------------------
    // Load existing table
    // ----------------------------
    let store = match table {
        Some(path) => load_table(path)?,
        None => InMemoryDimensionStore::new(),
    };

    // ----------------------------
    // Replay
    // ----------------------------
    let mut engine = ReplayEngine::new(store, config);
    let source = JsonRecordFile::new(records);
    let report = run_pipeline(&source, &mut engine)?;

    let summary = report.summary();
    info!(
        applied = summary.applied,
        rejected = summary.rejected,
        "replay finished"
    );

    // ----------------------------
    // Persist
    // ----------------------------
    if let Some(path) = out {
        json::write_table(path, engine.store())
            .with_context(|| format!("writing table {}", path.display()))?;
    }

    // ----------------------------
    // Output
    // ----------------------------
    let mut output = ReplayOutput {
        summary,
        applied: Vec::new(),
        rejected: Vec::new(),
    };
    for outcome in report.outcomes {
        match outcome {
            BatchOutcome::Applied(applied) => output.applied.push(applied),
            BatchOutcome::Rejected { load_date, error } => output.rejected.push(RejectedBatch {
                load_date,
                error: error.to_string(),
            }),
        }
    }

    print_json(&output)
}

/// Restore a persisted table and warn about anything the audit flags.
fn load_table(path: &Path) -> Result<InMemoryDimensionStore> {
    let store =
        json::read_table(path).with_context(|| format!("loading table {}", path.display()))?;

    let audit = audit_store(&store);
    for finding in audit.findings.iter().filter(|f| f.severity > Severity::Info) {
        warn!(entity_id = %finding.entity_id, kind = ?finding.kind, "{}", finding.message);
    }

    Ok(store)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
