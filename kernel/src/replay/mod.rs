// SCD2 Replay Engine
//
// Applies dated batches to a dimension store one at a time, turning
// attribute changes into expired and inserted versions while enforcing
// invariants before anything is committed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{Attributes, Batch, EntityId, OrderingError};
use crate::config::{AbsencePolicy, EngineConfig};
use crate::dimension::{ChangeSet, DimensionStore, StoreError, Version};
use crate::invariants::{InvariantEngine, InvariantViolation};

/// Errors that can occur while applying a batch.
///
/// Every error leaves the store exactly as it was before the batch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ordering error: {0}")]
    Ordering(#[from] OrderingError),

    #[error("entity {entity_id} appears in batch {load_date} with differing attributes")]
    DuplicateConflict {
        load_date: NaiveDate,
        entity_id: EntityId,
    },

    #[error(
        "entity {entity_id} in batch {load_date} has attributes {actual:?}, expected {expected:?}"
    )]
    SchemaMismatch {
        load_date: NaiveDate,
        entity_id: EntityId,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one applied batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub load_date: NaiveDate,
    pub commit_id: Uuid,
    pub inserted: usize,
    pub expired: usize,
    pub unchanged: usize,
}

impl ApplyReport {
    /// Number of new versions written by the batch.
    pub fn applied_count(&self) -> usize {
        self.inserted
    }
}

/// Single writer of a dimension store.
pub struct ReplayEngine<S> {
    store: S,
    config: EngineConfig,
    invariants: InvariantEngine,
}

impl<S: DimensionStore> ReplayEngine<S> {
    /// Engine with the standard invariants for `config`.
    pub fn new(store: S, config: EngineConfig) -> Self {
        let invariants = config.invariants();
        Self::with_invariants(store, config, invariants)
    }

    pub fn with_invariants(store: S, config: EngineConfig, invariants: InvariantEngine) -> Self {
        Self {
            store,
            config,
            invariants,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Advance the store to the state as of `batch.load_date`.
    ///
    /// Changed entities have their active version expired at the batch
    /// date and a successor inserted; unchanged entities are left alone.
    pub fn apply_batch(&mut self, batch: &Batch) -> Result<ApplyReport, EngineError> {
        let result = self.try_apply(batch);
        if let Err(err) = &result {
            warn!(load_date = %batch.load_date, error = %err, "batch rejected");
        }
        result
    }

    fn try_apply(&mut self, batch: &Batch) -> Result<ApplyReport, EngineError> {
        self.check_ordering(batch.load_date)?;
        self.check_schema(batch)?;

        let observed = deduplicate(batch)?;
        let (changes, unchanged) = self.plan(batch.load_date, &observed);
        self.verify(&changes)?;

        let record = self.store.commit(changes)?;

        let report = ApplyReport {
            load_date: record.load_date,
            commit_id: record.commit_id,
            inserted: record.inserted,
            expired: record.expired,
            unchanged,
        };

        info!(
            load_date = %report.load_date,
            records = batch.len(),
            inserted = report.inserted,
            expired = report.expired,
            unchanged = report.unchanged,
            "batch applied"
        );

        Ok(report)
    }

    fn check_ordering(&self, load_date: NaiveDate) -> Result<(), OrderingError> {
        match self.store.high_water_mark() {
            Some(previous) if load_date == previous => {
                Err(OrderingError::RepeatedLoadDate { load_date })
            }
            Some(previous) if load_date < previous => Err(OrderingError::OutOfOrder {
                previous,
                attempted: load_date,
            }),
            _ => Ok(()),
        }
    }

    fn check_schema(&self, batch: &Batch) -> Result<(), EngineError> {
        let Some(tracked) = &self.config.tracked_attributes else {
            return Ok(());
        };
        let expected: BTreeSet<&str> = tracked.iter().map(String::as_str).collect();

        for record in &batch.records {
            let actual: BTreeSet<&str> = record.attributes.names().collect();
            if actual != expected {
                return Err(EngineError::SchemaMismatch {
                    load_date: batch.load_date,
                    entity_id: record.entity_id.clone(),
                    expected: expected.iter().map(|s| s.to_string()).collect(),
                    actual: actual.iter().map(|s| s.to_string()).collect(),
                });
            }
        }
        Ok(())
    }

    /// Build the change set for one batch: expirations first, then inserts.
    fn plan(
        &self,
        load_date: NaiveDate,
        observed: &BTreeMap<&EntityId, &Attributes>,
    ) -> (ChangeSet, usize) {
        let mut changes = ChangeSet::new(load_date);
        let mut unchanged = 0;

        for (&entity_id, &attributes) in observed {
            match self.store.active_version(entity_id) {
                Some(active) if &active.attributes == attributes => {
                    unchanged += 1;
                }
                Some(active) => {
                    debug!(
                        entity_id = %entity_id,
                        version_id = active.version_id,
                        "attributes changed"
                    );
                    changes.expire(active);
                    changes.insert(entity_id.clone(), attributes.clone());
                }
                None => {
                    debug!(entity_id = %entity_id, "no active version");
                    changes.insert(entity_id.clone(), attributes.clone());
                }
            }
        }

        if self.config.absence_policy == AbsencePolicy::ExpireAbsent {
            for active in self.store.current_snapshot() {
                if !observed.contains_key(&active.entity_id) {
                    debug!(entity_id = %active.entity_id, "absent from batch, expiring");
                    changes.expire(active);
                }
            }
        }

        (changes, unchanged)
    }

    /// Stage every touched entity and run the invariants on the result.
    fn verify(&self, changes: &ChangeSet) -> Result<(), InvariantViolation> {
        for entity_id in changes.touched_entities() {
            let before: Vec<Version> = self
                .store
                .timeline(entity_id)
                .into_iter()
                .cloned()
                .collect();
            let after = changes.stage(entity_id, &before);

            self.invariants
                .evaluate(entity_id, &before, changes, &after)?;
        }
        Ok(())
    }
}

/// Collapse repeated records for the same entity.
///
/// Identical repeats are harmless; differing ones cannot be ordered
/// within a single load date.
fn deduplicate(batch: &Batch) -> Result<BTreeMap<&EntityId, &Attributes>, EngineError> {
    let mut observed: BTreeMap<&EntityId, &Attributes> = BTreeMap::new();

    for record in &batch.records {
        match observed.get(&record.entity_id) {
            Some(&existing) if existing != &record.attributes => {
                return Err(EngineError::DuplicateConflict {
                    load_date: batch.load_date,
                    entity_id: record.entity_id.clone(),
                });
            }
            Some(_) => {}
            None => {
                observed.insert(&record.entity_id, &record.attributes);
            }
        }
    }

    Ok(observed)
}

/// Apply batches in order, stopping at the first rejected one.
///
/// Batches applied before the failure stay committed.
pub fn replay<'a, S, I>(
    engine: &mut ReplayEngine<S>,
    batches: I,
) -> Result<Vec<ApplyReport>, EngineError>
where
    S: DimensionStore,
    I: IntoIterator<Item = &'a Batch>,
{
    let mut reports = Vec::new();
    for batch in batches {
        reports.push(engine.apply_batch(batch)?);
    }
    Ok(reports)
}
