// Replay Pipeline
//
// Runs the full flow:
// source → grouper → replay engine → dimension store
//
// Unlike `replay`, a rejected batch does not stop the run; it is recorded
// and the next load date is attempted.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::batch::grouper::BatchGrouper;
use crate::batch::source::{BatchSource, SourceError};
use crate::dimension::DimensionStore;
use crate::replay::{ApplyReport, EngineError, ReplayEngine};

/// What happened to one load date.
#[derive(Debug)]
pub enum BatchOutcome {
    Applied(ApplyReport),
    Rejected {
        load_date: NaiveDate,
        error: EngineError,
    },
}

impl BatchOutcome {
    pub fn load_date(&self) -> NaiveDate {
        match self {
            BatchOutcome::Applied(report) => report.load_date,
            BatchOutcome::Rejected { load_date, .. } => *load_date,
        }
    }
}

/// Result of a full pipeline run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl PipelineReport {
    pub fn applied(&self) -> impl Iterator<Item = &ApplyReport> {
        self.outcomes.iter().filter_map(|o| match o {
            BatchOutcome::Applied(report) => Some(report),
            BatchOutcome::Rejected { .. } => None,
        })
    }

    pub fn rejected(&self) -> impl Iterator<Item = (NaiveDate, &EngineError)> {
        self.outcomes.iter().filter_map(|o| match o {
            BatchOutcome::Rejected { load_date, error } => Some((*load_date, error)),
            BatchOutcome::Applied(_) => None,
        })
    }

    /// True if every batch was applied.
    pub fn is_clean(&self) -> bool {
        self.rejected().next().is_none()
    }

    pub fn summary(&self) -> PipelineSummary {
        let applied: Vec<&ApplyReport> = self.applied().collect();
        PipelineSummary {
            batches: self.outcomes.len(),
            applied: applied.len(),
            rejected: self.outcomes.len() - applied.len(),
            inserted: applied.iter().map(|r| r.inserted).sum(),
            expired: applied.iter().map(|r| r.expired).sum(),
        }
    }
}

/// Aggregate counts over a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub batches: usize,
    pub applied: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub expired: usize,
}

/// Errors that stop the pipeline before any batch is applied.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("batch source failed: {0}")]
    Source(#[from] SourceError),
}

/// Load every record from `source` and replay it batch by batch.
pub fn run_pipeline<Src, S>(
    source: &Src,
    engine: &mut ReplayEngine<S>,
) -> Result<PipelineReport, PipelineError>
where
    Src: BatchSource + ?Sized,
    S: DimensionStore,
{
    let grouper = BatchGrouper::new(source.load()?);
    info!(load_dates = grouper.len(), "replaying batch source");

    let mut report = PipelineReport::default();

    for batch in grouper.batches() {
        let outcome = match batch {
            Ok(batch) => match engine.apply_batch(&batch) {
                Ok(applied) => BatchOutcome::Applied(applied),
                Err(error) => BatchOutcome::Rejected {
                    load_date: batch.load_date,
                    error,
                },
            },
            Err(error) => BatchOutcome::Rejected {
                load_date: error.load_date(),
                error: error.into(),
            },
        };
        report.outcomes.push(outcome);
    }

    Ok(report)
}
