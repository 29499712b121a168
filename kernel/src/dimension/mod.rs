// Dimension Model
//
// Versions of entities as stored in the historized dimension table,
// and the per-batch change sets that move the table forward in time.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::batch::{Attributes, EntityId};
use crate::log::LogError;

pub mod memory;
pub mod store;

pub use memory::InMemoryDimensionStore;
pub use store::DimensionStore;

/// `valid_to` of every version that is still current.
///
/// This is the only place the far-future marker is spelled out.
pub const SENTINEL_DATE: NaiveDate = match NaiveDate::from_ymd_opt(9999, 12, 31) {
    Some(date) => date,
    None => panic!("sentinel date out of range"),
};

/// Surrogate key of a version, assigned by the store on insert.
pub type VersionId = u64;

/// Placeholder id carried by staged versions that are not yet committed.
pub const PENDING_VERSION_ID: VersionId = VersionId::MAX;

/// One row of the dimension table.
///
/// The validity range is half-open: the version covers `valid_from`
/// up to, but not including, `valid_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: VersionId,
    pub entity_id: EntityId,
    pub attributes: Attributes,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub is_active: bool,
}

impl Version {
    /// A fresh current version.
    pub fn new_active(
        version_id: VersionId,
        entity_id: EntityId,
        attributes: Attributes,
        valid_from: NaiveDate,
    ) -> Self {
        Self {
            version_id,
            entity_id,
            attributes,
            valid_from,
            valid_to: SENTINEL_DATE,
            is_active: true,
        }
    }

    /// Close the version at `at`. Both end markers change together.
    pub fn expire(&mut self, at: NaiveDate) {
        self.valid_to = at;
        self.is_active = false;
    }

    /// True if `valid_to` is the sentinel.
    pub fn is_current(&self) -> bool {
        self.valid_to == SENTINEL_DATE
    }

    /// The active flag agrees with `valid_to`.
    pub fn is_consistent(&self) -> bool {
        self.is_active == self.is_current()
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && date < self.valid_to
    }
}

/// Closes an active version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    pub version_id: VersionId,
    pub entity_id: EntityId,
    pub valid_to: NaiveDate,
}

/// Opens a new active version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insertion {
    pub entity_id: EntityId,
    pub attributes: Attributes,
    pub valid_from: NaiveDate,
}

/// All mutations produced by one batch.
///
/// Stores apply every expiration before any insertion, and apply the
/// whole set or none of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub load_date: NaiveDate,
    pub expirations: Vec<Expiration>,
    pub insertions: Vec<Insertion>,
}

impl ChangeSet {
    pub fn new(load_date: NaiveDate) -> Self {
        Self {
            load_date,
            expirations: Vec::new(),
            insertions: Vec::new(),
        }
    }

    pub fn expire(&mut self, version: &Version) {
        self.expirations.push(Expiration {
            version_id: version.version_id,
            entity_id: version.entity_id.clone(),
            valid_to: self.load_date,
        });
    }

    pub fn insert(&mut self, entity_id: EntityId, attributes: Attributes) {
        self.insertions.push(Insertion {
            entity_id,
            attributes,
            valid_from: self.load_date,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.expirations.is_empty() && self.insertions.is_empty()
    }

    /// Entities with at least one expiration or insertion.
    pub fn touched_entities(&self) -> BTreeSet<&EntityId> {
        self.expirations
            .iter()
            .map(|e| &e.entity_id)
            .chain(self.insertions.iter().map(|i| &i.entity_id))
            .collect()
    }

    /// Timeline of `entity_id` as it would look after this change set.
    ///
    /// Inserted versions carry [`PENDING_VERSION_ID`].
    pub fn stage(&self, entity_id: &EntityId, before: &[Version]) -> Vec<Version> {
        let mut after = before.to_vec();

        for expiration in self.expirations.iter().filter(|e| &e.entity_id == entity_id) {
            if let Some(version) = after
                .iter_mut()
                .find(|v| v.version_id == expiration.version_id)
            {
                version.expire(expiration.valid_to);
            }
        }

        for insertion in self.insertions.iter().filter(|i| &i.entity_id == entity_id) {
            after.push(Version::new_active(
                PENDING_VERSION_ID,
                insertion.entity_id.clone(),
                insertion.attributes.clone(),
                insertion.valid_from,
            ));
        }

        after.sort_by_key(|v| v.valid_from);
        after
    }
}

/// Errors raised by dimension stores.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("version {version_id} does not exist")]
    UnknownVersion { version_id: VersionId },

    #[error("version {version_id} is already expired")]
    AlreadyExpired { version_id: VersionId },

    #[error("version {version_id} cannot end on {valid_to}, it starts on {valid_from}")]
    InvalidRange {
        version_id: VersionId,
        valid_from: NaiveDate,
        valid_to: NaiveDate,
    },

    #[error("version {version_id} has is_active inconsistent with valid_to")]
    InconsistentRow { version_id: VersionId },

    #[error("version id {version_id} is reserved for uncommitted versions")]
    ReservedVersionId { version_id: VersionId },

    #[error("cannot allocate {requested} version ids starting at {next}")]
    VersionIdsExhausted { next: VersionId, requested: usize },

    #[error("version id {version_id} appears more than once")]
    DuplicateVersionId { version_id: VersionId },

    #[error("commit log rejected batch: {0}")]
    Log(#[from] LogError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn sentinel_is_far_future() {
        assert_eq!(SENTINEL_DATE, date("9999-12-31"));
    }

    #[test]
    fn expire_keeps_flag_and_end_date_together() {
        let mut v = Version::new_active(
            1,
            EntityId::Int(3),
            Attributes::new().with("quantity", 16),
            date("2025-12-20"),
        );
        assert!(v.is_active && v.is_current() && v.is_consistent());

        v.expire(date("2025-12-25"));

        assert!(!v.is_active);
        assert_eq!(v.valid_to, date("2025-12-25"));
        assert!(v.is_consistent());
    }

    #[test]
    fn covers_is_half_open() {
        let mut v = Version::new_active(1, EntityId::Int(3), Attributes::new(), date("2025-12-20"));
        v.expire(date("2025-12-25"));

        assert!(!v.covers(date("2025-12-19")));
        assert!(v.covers(date("2025-12-20")));
        assert!(v.covers(date("2025-12-24")));
        assert!(!v.covers(date("2025-12-25")));
    }

    #[test]
    fn stage_applies_expiry_then_insert() {
        let entity = EntityId::Int(3);
        let before = vec![Version::new_active(
            1,
            entity.clone(),
            Attributes::new().with("quantity", 16),
            date("2025-12-20"),
        )];

        let mut changes = ChangeSet::new(date("2025-12-25"));
        changes.expire(&before[0]);
        changes.insert(entity.clone(), Attributes::new().with("quantity", 18));

        let after = changes.stage(&entity, &before);

        assert_eq!(after.len(), 2);
        assert_eq!(after[0].valid_to, date("2025-12-25"));
        assert!(!after[0].is_active);
        assert_eq!(after[1].version_id, PENDING_VERSION_ID);
        assert!(after[1].is_active);
    }
}
