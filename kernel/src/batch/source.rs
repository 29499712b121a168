// Batch Source Abstraction
//
// The external collaborator that supplies dated records. The kernel
// never assumes anything about where records come from.

use super::SourceRecord;

/// Failure reported by a source implementation.
///
/// Opaque so that the trait does not depend on any storage format.
#[derive(Debug, thiserror::Error)]
#[error("failed to load batch source: {0}")]
pub struct SourceError(#[source] Box<dyn std::error::Error + Send + Sync>);

impl SourceError {
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self(error.into())
    }
}

/// Supplier of dated records.
///
/// Implementations may return records in any order and may repeat a
/// load date; grouping and ordering is the job of the batch grouper.
pub trait BatchSource {
    fn load(&self) -> Result<Vec<SourceRecord>, SourceError>;
}

/// Source backed by records held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    records: Vec<SourceRecord>,
}

impl InMemorySource {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: SourceRecord) {
        self.records.push(record);
    }
}

impl BatchSource for InMemorySource {
    fn load(&self) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Attributes, EntityId};

    struct Unreachable;

    impl BatchSource for Unreachable {
        fn load(&self) -> Result<Vec<SourceRecord>, SourceError> {
            Err(SourceError::new("connection refused"))
        }
    }

    #[test]
    fn in_memory_source_returns_pushed_records() {
        let mut source = InMemorySource::default();
        source.push(SourceRecord::new(
            "2025-12-20".parse().unwrap(),
            3,
            Attributes::new().with("quantity", 16),
        ));

        let records = source.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_id, EntityId::Int(3));
    }

    #[test]
    fn source_errors_carry_the_underlying_cause() {
        let err = Unreachable.load().unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to load batch source: connection refused"
        );
    }
}
