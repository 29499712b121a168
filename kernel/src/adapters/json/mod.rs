// JSON Adapter
//
// Reads dated source records from JSON and persists the dimension table
// as a JSON document holding the store's high water mark and an array of
// flat rows:
//
//   { version_id, entity_id, <attributes...>, valid_from, valid_to, is_active }

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::batch::source::{BatchSource, SourceError};
use crate::batch::{Attributes, EntityId, SourceRecord};
use crate::dimension::{
    DimensionStore, InMemoryDimensionStore, StoreError, Version, VersionId,
};

/// Column names of a persisted row that attributes may not shadow.
pub const RESERVED_COLUMNS: [&str; 5] = [
    "version_id",
    "entity_id",
    "valid_from",
    "valid_to",
    "is_active",
];

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("attribute `{name}` of entity {entity_id} collides with a row column")]
    ReservedAttribute { entity_id: EntityId, name: String },

    #[error("cannot restore table: {0}")]
    Store(#[from] StoreError),
}

/// One persisted row of the dimension table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRow {
    pub version_id: VersionId,
    pub entity_id: EntityId,
    #[serde(flatten)]
    pub attributes: Attributes,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub is_active: bool,
}

impl DimensionRow {
    fn from_version(version: &Version) -> Result<Self, AdapterError> {
        if let Some(name) = version
            .attributes
            .names()
            .find(|name| RESERVED_COLUMNS.contains(name))
        {
            return Err(AdapterError::ReservedAttribute {
                entity_id: version.entity_id.clone(),
                name: name.to_string(),
            });
        }

        Ok(Self {
            version_id: version.version_id,
            entity_id: version.entity_id.clone(),
            attributes: version.attributes.clone(),
            valid_from: version.valid_from,
            valid_to: version.valid_to,
            is_active: version.is_active,
        })
    }
}

/// A persisted dimension table.
///
/// `high_water_mark` keeps load dates that changed no row from being
/// applied a second time after a restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    pub high_water_mark: Option<NaiveDate>,
    pub rows: Vec<DimensionRow>,
}

impl From<DimensionRow> for Version {
    fn from(row: DimensionRow) -> Self {
        Version {
            version_id: row.version_id,
            entity_id: row.entity_id,
            attributes: row.attributes,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            is_active: row.is_active,
        }
    }
}

/// Parse a JSON array of `{load_date, entity_id, attributes}` records.
pub fn parse_records(json: &str) -> Result<Vec<SourceRecord>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Batch source reading a JSON record file on every load.
#[derive(Debug, Clone)]
pub struct JsonRecordFile {
    path: PathBuf,
}

impl JsonRecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BatchSource for JsonRecordFile {
    fn load(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let data = fs::read_to_string(&self.path).map_err(SourceError::new)?;
        parse_records(&data).map_err(SourceError::new)
    }
}

/// Flatten every version of the store into persisted rows.
pub fn rows_from_store<S>(store: &S) -> Result<Vec<DimensionRow>, AdapterError>
where
    S: DimensionStore + ?Sized,
{
    store
        .entity_ids()
        .into_iter()
        .flat_map(|id| store.timeline(id))
        .map(DimensionRow::from_version)
        .collect()
}

/// Rebuild an in-memory store from persisted rows.
pub fn store_from_rows(rows: Vec<DimensionRow>) -> Result<InMemoryDimensionStore, AdapterError> {
    let store = InMemoryDimensionStore::from_versions(rows.into_iter().map(Version::from))?;
    Ok(store)
}

/// Snapshot the whole store, rows and high water mark.
pub fn table_from_store<S>(store: &S) -> Result<TableDocument, AdapterError>
where
    S: DimensionStore + ?Sized,
{
    Ok(TableDocument {
        high_water_mark: store.high_water_mark(),
        rows: rows_from_store(store)?,
    })
}

/// Rebuild an in-memory store from a persisted table.
pub fn store_from_table(table: TableDocument) -> Result<InMemoryDimensionStore, AdapterError> {
    let store = store_from_rows(table.rows)?.with_high_water_mark(table.high_water_mark);
    Ok(store)
}

pub fn read_table(path: &Path) -> Result<InMemoryDimensionStore, AdapterError> {
    let data = fs::read_to_string(path)?;
    let table: TableDocument = serde_json::from_str(&data)?;
    store_from_table(table)
}

pub fn write_table<S>(path: &Path, store: &S) -> Result<(), AdapterError>
where
    S: DimensionStore + ?Sized,
{
    let table = table_from_store(store)?;
    fs::write(path, serde_json::to_string_pretty(&table)?)?;
    Ok(())
}
