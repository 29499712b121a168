// Dimension Store Abstraction
//
// Defines the data-access contract for the historized dimension table.
// Implementations may keep versions in memory, in files, in a warehouse.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::{ChangeSet, StoreError, Version};
use crate::batch::EntityId;
use crate::log::CommitRecord;

/// Storage backend for dimension versions.
///
/// Properties required from implementations:
/// - Atomic commits: a change set is applied fully or not at all
/// - Expirations applied before insertions within a commit
/// - Strictly increasing commit load dates
///
/// Implementations MUST NOT:
/// - Delete versions
/// - Edit attributes or `valid_from` of a stored version
/// - Change `valid_to` without changing `is_active` in the same write
pub trait DimensionStore {
    /// Every entity with at least one version.
    fn entity_ids(&self) -> Vec<&EntityId>;

    /// All versions of an entity ordered by `valid_from`.
    ///
    /// Unknown entities yield an empty timeline.
    fn timeline(&self, entity_id: &EntityId) -> Vec<&Version>;

    /// Latest date the store has seen, if any.
    ///
    /// New batches must be dated strictly after it.
    fn high_water_mark(&self) -> Option<NaiveDate>;

    /// Apply one batch's change set atomically.
    fn commit(&mut self, changes: ChangeSet) -> Result<CommitRecord, StoreError>;

    /// The current version of an entity.
    fn active_version(&self, entity_id: &EntityId) -> Option<&Version> {
        self.timeline(entity_id).into_iter().find(|v| v.is_active)
    }

    /// Every active version, one per live entity.
    fn current_snapshot(&self) -> Vec<&Version> {
        self.entity_ids()
            .into_iter()
            .filter_map(|id| self.active_version(id))
            .collect()
    }

    /// The version of an entity whose validity range covers `date`.
    fn as_of(&self, entity_id: &EntityId, date: NaiveDate) -> Option<&Version> {
        self.timeline(entity_id)
            .into_iter()
            .find(|v| v.covers(date))
    }

    /// Number of versions per entity.
    fn change_frequency(&self) -> BTreeMap<EntityId, usize> {
        self.entity_ids()
            .into_iter()
            .map(|id| (id.clone(), self.timeline(id).len()))
            .collect()
    }
}
