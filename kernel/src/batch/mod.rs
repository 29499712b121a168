// Batch Model
//
// Dated observations of entity attributes, and the batches they are
// grouped into before being replayed against the dimension store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod grouper;
pub mod source;

/// Business key of a dimension entity.
///
/// Not unique in the store: every version of an entity repeats it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "{id}"),
            EntityId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Int(id)
    }
}

impl From<i32> for EntityId {
    fn from(id: i32) -> Self {
        EntityId::Int(i64::from(id))
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Text(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Text(id)
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    /// Numeric keys parse as integers, anything else is kept as text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<i64>()
            .map(EntityId::Int)
            .unwrap_or_else(|_| EntityId::Text(s.to_string())))
    }
}

/// Tracked attributes of an entity, keyed by attribute name.
///
/// Change detection compares the whole map: two attribute sets are equal
/// only if every name and value matches exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// A single observation as delivered by a batch source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub load_date: NaiveDate,
    pub entity_id: EntityId,
    pub attributes: Attributes,
}

impl SourceRecord {
    pub fn new(
        load_date: NaiveDate,
        entity_id: impl Into<EntityId>,
        attributes: Attributes,
    ) -> Self {
        Self {
            load_date,
            entity_id: entity_id.into(),
            attributes,
        }
    }
}

/// One entity's attributes inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub entity_id: EntityId,
    pub attributes: Attributes,
}

/// The world as observed on a single load date.
///
/// Batches built by hand may contain the same entity twice; the replay
/// engine collapses identical duplicates and rejects conflicting ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub load_date: NaiveDate,
    pub records: Vec<BatchRecord>,
}

impl Batch {
    pub fn new(load_date: NaiveDate) -> Self {
        Self {
            load_date,
            records: Vec::new(),
        }
    }

    /// Builder-style push.
    pub fn with_record(mut self, entity_id: impl Into<EntityId>, attributes: Attributes) -> Self {
        self.push(entity_id, attributes);
        self
    }

    pub fn push(&mut self, entity_id: impl Into<EntityId>, attributes: Attributes) {
        self.records.push(BatchRecord {
            entity_id: entity_id.into(),
            attributes,
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Batches that cannot be placed on the timeline.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("batch dated {attempted} arrived after {previous} was already applied")]
    OutOfOrder {
        previous: NaiveDate,
        attempted: NaiveDate,
    },

    #[error("load date {load_date} has already been applied")]
    RepeatedLoadDate { load_date: NaiveDate },

    #[error("records for entity {entity_id} on {load_date} carry conflicting attributes")]
    ConflictingRecords {
        load_date: NaiveDate,
        entity_id: EntityId,
    },
}

impl OrderingError {
    /// Load date of the rejected batch.
    pub fn load_date(&self) -> NaiveDate {
        match self {
            OrderingError::OutOfOrder { attempted, .. } => *attempted,
            OrderingError::RepeatedLoadDate { load_date } => *load_date,
            OrderingError::ConflictingRecords { load_date, .. } => *load_date,
        }
    }
}
