// In-Memory Dimension Store
//
// Keeps every version in process memory, grouped by entity. Suitable
// for replaying a full history and for tests.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tracing::debug;

use super::store::DimensionStore;
use super::{ChangeSet, StoreError, Version, VersionId, PENDING_VERSION_ID};
use crate::batch::EntityId;
use crate::log::{CommitLog, CommitRecord, LogError};

#[derive(Debug)]
pub struct InMemoryDimensionStore {
    versions: BTreeMap<EntityId, Vec<Version>>,
    log: CommitLog,
    next_version_id: VersionId,
    restored_through: Option<NaiveDate>,
}

impl Default for InMemoryDimensionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDimensionStore {
    pub fn new() -> Self {
        Self {
            versions: BTreeMap::new(),
            log: CommitLog::new(),
            next_version_id: 1,
            restored_through: None,
        }
    }

    /// Rebuild a store from previously persisted versions.
    ///
    /// Rows are checked one by one; table-wide invariants are left to
    /// the audit.
    pub fn from_versions<I>(versions: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = Version>,
    {
        let mut store = Self::new();
        let mut seen = BTreeSet::new();

        for version in versions {
            if version.version_id == PENDING_VERSION_ID {
                return Err(StoreError::ReservedVersionId {
                    version_id: version.version_id,
                });
            }
            if !version.is_consistent() {
                return Err(StoreError::InconsistentRow {
                    version_id: version.version_id,
                });
            }
            if version.valid_to <= version.valid_from {
                return Err(StoreError::InvalidRange {
                    version_id: version.version_id,
                    valid_from: version.valid_from,
                    valid_to: version.valid_to,
                });
            }
            if !seen.insert(version.version_id) {
                return Err(StoreError::DuplicateVersionId {
                    version_id: version.version_id,
                });
            }

            let mark = if version.is_current() {
                version.valid_from
            } else {
                version.valid_to
            };
            store.restored_through = store.restored_through.max(Some(mark));
            store.next_version_id = store.next_version_id.max(version.version_id + 1);

            store
                .versions
                .entry(version.entity_id.clone())
                .or_default()
                .push(version);
        }

        for timeline in store.versions.values_mut() {
            timeline.sort_by_key(|v| v.valid_from);
        }

        Ok(store)
    }

    /// Raise the high water mark to a date persisted alongside the rows.
    ///
    /// Load dates that only carried no-op batches leave no trace in the
    /// rows themselves.
    pub fn with_high_water_mark(mut self, mark: Option<NaiveDate>) -> Self {
        self.restored_through = self.restored_through.max(mark);
        self
    }

    /// Every stored version, grouped by entity and ordered by `valid_from`.
    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.values().flatten()
    }

    pub fn log(&self) -> &CommitLog {
        &self.log
    }

    /// Total number of versions.
    pub fn len(&self) -> usize {
        self.versions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn find(&self, entity_id: &EntityId, version_id: VersionId) -> Option<&Version> {
        self.versions
            .get(entity_id)?
            .iter()
            .find(|v| v.version_id == version_id)
    }

    fn find_mut(&mut self, entity_id: &EntityId, version_id: VersionId) -> Option<&mut Version> {
        self.versions
            .get_mut(entity_id)?
            .iter_mut()
            .find(|v| v.version_id == version_id)
    }

    /// Check a change set against the current contents without mutating.
    fn validate(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        if let Some(mark) = self.high_water_mark() {
            if changes.load_date <= mark {
                return Err(LogError::OutOfOrder {
                    last: mark,
                    attempted: changes.load_date,
                }
                .into());
            }
        }

        let mut expiring = BTreeSet::new();
        for expiration in &changes.expirations {
            let version_id = expiration.version_id;
            let version = self
                .find(&expiration.entity_id, version_id)
                .ok_or(StoreError::UnknownVersion { version_id })?;

            if !version.is_active || !expiring.insert(version_id) {
                return Err(StoreError::AlreadyExpired { version_id });
            }
            if expiration.valid_to <= version.valid_from {
                return Err(StoreError::InvalidRange {
                    version_id,
                    valid_from: version.valid_from,
                    valid_to: expiration.valid_to,
                });
            }
        }

        // Ids handed out by this commit must stay below the pending marker.
        let next = self.next_version_id;
        let requested = changes.insertions.len();
        let exhausted = || StoreError::VersionIdsExhausted { next, requested };

        let end = u64::try_from(requested)
            .ok()
            .and_then(|n| next.checked_add(n))
            .ok_or_else(exhausted)?;
        if end > PENDING_VERSION_ID {
            return Err(exhausted());
        }

        Ok(())
    }
}

impl DimensionStore for InMemoryDimensionStore {
    fn entity_ids(&self) -> Vec<&EntityId> {
        self.versions.keys().collect()
    }

    fn timeline(&self, entity_id: &EntityId) -> Vec<&Version> {
        self.versions
            .get(entity_id)
            .map(|versions| versions.iter().collect())
            .unwrap_or_default()
    }

    fn high_water_mark(&self) -> Option<NaiveDate> {
        self.log.last_load_date().max(self.restored_through)
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<CommitRecord, StoreError> {
        self.validate(&changes)?;

        let record = CommitRecord::new(
            changes.load_date,
            changes.expirations.len(),
            changes.insertions.len(),
        );
        self.log.append(record.clone())?;

        // Nothing below can fail.
        for expiration in changes.expirations {
            if let Some(version) = self.find_mut(&expiration.entity_id, expiration.version_id) {
                version.expire(expiration.valid_to);
            }
        }

        for insertion in changes.insertions {
            let version_id = self.next_version_id;
            self.next_version_id += 1;

            self.versions
                .entry(insertion.entity_id.clone())
                .or_default()
                .push(Version::new_active(
                    version_id,
                    insertion.entity_id,
                    insertion.attributes,
                    insertion.valid_from,
                ));
        }

        debug!(
            commit_id = %record.commit_id,
            load_date = %record.load_date,
            expired = record.expired,
            inserted = record.inserted,
            "committed change set"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Attributes;
    use crate::dimension::SENTINEL_DATE;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn qty(n: i64) -> Attributes {
        Attributes::new().with("quantity", n)
    }

    fn seeded() -> InMemoryDimensionStore {
        let mut store = InMemoryDimensionStore::new();
        let mut changes = ChangeSet::new(date("2025-12-20"));
        changes.insert(EntityId::Int(3), qty(16));
        changes.insert(EntityId::Int(4), qty(1));
        store.commit(changes).unwrap();
        store
    }

    #[test]
    fn commit_assigns_ids_and_logs() {
        let store = seeded();

        assert_eq!(store.len(), 2);
        assert_eq!(store.log().len(), 1);
        assert_eq!(store.high_water_mark(), Some(date("2025-12-20")));

        let active = store.active_version(&EntityId::Int(3)).unwrap();
        assert_eq!(active.version_id, 1);
        assert_eq!(active.valid_to, SENTINEL_DATE);
    }

    #[test]
    fn failed_commit_leaves_store_untouched() {
        let mut store = seeded();

        let mut changes = ChangeSet::new(date("2025-12-25"));
        changes.insert(EntityId::Int(5), qty(9));
        changes.expirations.push(crate::dimension::Expiration {
            version_id: 99,
            entity_id: EntityId::Int(3),
            valid_to: date("2025-12-25"),
        });

        let err = store.commit(changes).unwrap_err();

        assert_eq!(err, StoreError::UnknownVersion { version_id: 99 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.log().len(), 1);
        assert!(store.timeline(&EntityId::Int(5)).is_empty());
    }

    #[test]
    fn expiring_twice_is_rejected() {
        let mut store = seeded();
        let active = store.active_version(&EntityId::Int(3)).unwrap().clone();

        let mut changes = ChangeSet::new(date("2025-12-25"));
        changes.expire(&active);
        changes.expire(&active);

        let err = store.commit(changes).unwrap_err();
        assert_eq!(err, StoreError::AlreadyExpired { version_id: 1 });
    }

    #[test]
    fn stale_commit_is_rejected() {
        let mut store = seeded();

        let err = store.commit(ChangeSet::new(date("2025-12-19"))).unwrap_err();

        assert!(matches!(err, StoreError::Log(LogError::OutOfOrder { .. })));
    }

    #[test]
    fn restore_from_versions() {
        let mut old = Version::new_active(7, EntityId::Int(3), qty(16), date("2025-12-20"));
        old.expire(date("2025-12-25"));
        let current = Version::new_active(8, EntityId::Int(3), qty(18), date("2025-12-25"));

        let store = InMemoryDimensionStore::from_versions(vec![current, old]).unwrap();

        let timeline = store.timeline(&EntityId::Int(3));
        assert_eq!(timeline[0].version_id, 7);
        assert_eq!(timeline[1].version_id, 8);
        assert_eq!(store.high_water_mark(), Some(date("2025-12-25")));
        assert_eq!(store.next_version_id, 9);
    }

    #[test]
    fn restore_rejects_pending_version_id() {
        let row = Version::new_active(
            PENDING_VERSION_ID,
            EntityId::Int(3),
            qty(16),
            date("2025-12-20"),
        );

        let err = InMemoryDimensionStore::from_versions(vec![row]).unwrap_err();
        assert_eq!(
            err,
            StoreError::ReservedVersionId {
                version_id: PENDING_VERSION_ID
            }
        );
    }

    #[test]
    fn exhausted_version_ids_reject_commit_before_mutation() {
        let last = PENDING_VERSION_ID - 1;
        let row = Version::new_active(last, EntityId::Int(3), qty(16), date("2025-12-20"));
        let mut store = InMemoryDimensionStore::from_versions(vec![row]).unwrap();
        let active = store.active_version(&EntityId::Int(3)).unwrap().clone();

        let mut changes = ChangeSet::new(date("2025-12-25"));
        changes.expire(&active);
        changes.insert(EntityId::Int(3), qty(18));

        let err = store.commit(changes).unwrap_err();

        assert_eq!(
            err,
            StoreError::VersionIdsExhausted {
                next: PENDING_VERSION_ID,
                requested: 1
            }
        );
        assert!(store.log().is_empty());
        assert_eq!(store.len(), 1);
        assert!(store.active_version(&EntityId::Int(3)).unwrap().is_active);
    }

    #[test]
    fn persisted_high_water_mark_outranks_rows() {
        let row = Version::new_active(1, EntityId::Int(3), qty(16), date("2025-12-20"));

        let store = InMemoryDimensionStore::from_versions(vec![row])
            .unwrap()
            .with_high_water_mark(Some(date("2025-12-25")));

        assert_eq!(store.high_water_mark(), Some(date("2025-12-25")));
    }

    #[test]
    fn restore_rejects_inconsistent_rows() {
        let mut row = Version::new_active(1, EntityId::Int(3), qty(16), date("2025-12-20"));
        row.is_active = false;

        let err = InMemoryDimensionStore::from_versions(vec![row]).unwrap_err();
        assert_eq!(err, StoreError::InconsistentRow { version_id: 1 });
    }
}
