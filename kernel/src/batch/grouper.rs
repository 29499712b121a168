// Batch Grouper
//
// Turns an unordered pile of dated records into batches ordered by
// ascending load date. Records sharing a load date are merged into a
// single batch; the merge happens lazily, one load date at a time.

use std::collections::btree_map;
use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::{Batch, BatchRecord, EntityId, OrderingError, SourceRecord};

/// Groups source records by load date.
///
/// Iteration is restartable: every call to [`BatchGrouper::batches`]
/// walks the groups from the earliest load date again.
#[derive(Debug, Default, Clone)]
pub struct BatchGrouper {
    groups: BTreeMap<NaiveDate, Vec<SourceRecord>>,
}

impl BatchGrouper {
    pub fn new<I: IntoIterator<Item = SourceRecord>>(records: I) -> Self {
        let mut groups: BTreeMap<NaiveDate, Vec<SourceRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.load_date).or_default().push(record);
        }
        Self { groups }
    }

    /// Number of distinct load dates.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn load_dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.groups.keys()
    }

    /// Batches in ascending load date order.
    ///
    /// A load date whose records disagree about an entity yields an
    /// `OrderingError` for that date only; later dates are still produced.
    pub fn batches(&self) -> Batches<'_> {
        Batches {
            groups: self.groups.iter(),
        }
    }
}

/// Lazy iterator over merged batches.
pub struct Batches<'a> {
    groups: btree_map::Iter<'a, NaiveDate, Vec<SourceRecord>>,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch, OrderingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.groups
            .next()
            .map(|(load_date, records)| merge_group(*load_date, records))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

/// Merge all records of one load date, keeping first-seen entity order.
///
/// Repeated identical observations collapse; differing ones reject the
/// whole group rather than picking a winner.
fn merge_group(load_date: NaiveDate, records: &[SourceRecord]) -> Result<Batch, OrderingError> {
    let mut seen: BTreeMap<&EntityId, usize> = BTreeMap::new();
    let mut merged: Vec<BatchRecord> = Vec::with_capacity(records.len());

    for record in records {
        match seen.get(&record.entity_id) {
            Some(&index) => {
                if merged[index].attributes != record.attributes {
                    return Err(OrderingError::ConflictingRecords {
                        load_date,
                        entity_id: record.entity_id.clone(),
                    });
                }
            }
            None => {
                seen.insert(&record.entity_id, merged.len());
                merged.push(BatchRecord {
                    entity_id: record.entity_id.clone(),
                    attributes: record.attributes.clone(),
                });
            }
        }
    }

    Ok(Batch {
        load_date,
        records: merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Attributes;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn qty(n: i64) -> Attributes {
        Attributes::new().with("quantity", n)
    }

    #[test]
    fn batches_come_out_in_load_date_order() {
        let grouper = BatchGrouper::new(vec![
            SourceRecord::new(date("2025-12-25"), 3, qty(18)),
            SourceRecord::new(date("2025-12-20"), 3, qty(16)),
            SourceRecord::new(date("2025-12-20"), 4, qty(1)),
        ]);

        let batches: Vec<Batch> = grouper.batches().collect::<Result<_, _>>().unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].load_date, date("2025-12-20"));
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].load_date, date("2025-12-25"));
    }

    #[test]
    fn identical_records_on_same_date_collapse() {
        let grouper = BatchGrouper::new(vec![
            SourceRecord::new(date("2025-12-20"), 5, qty(2)),
            SourceRecord::new(date("2025-12-20"), 5, qty(2)),
        ]);

        let batch = grouper.batches().next().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn conflicting_records_reject_only_their_date() {
        let grouper = BatchGrouper::new(vec![
            SourceRecord::new(date("2025-12-20"), 5, qty(2)),
            SourceRecord::new(date("2025-12-20"), 5, qty(3)),
            SourceRecord::new(date("2025-12-21"), 5, qty(4)),
        ]);

        let results: Vec<_> = grouper.batches().collect();

        assert_eq!(
            results[0],
            Err(OrderingError::ConflictingRecords {
                load_date: date("2025-12-20"),
                entity_id: EntityId::Int(5),
            })
        );
        assert!(results[1].is_ok());
    }

    #[test]
    fn iteration_is_restartable() {
        let grouper = BatchGrouper::new(vec![
            SourceRecord::new(date("2025-12-20"), 1, qty(1)),
            SourceRecord::new(date("2025-12-21"), 1, qty(2)),
        ]);

        assert_eq!(grouper.batches().count(), 2);
        assert_eq!(grouper.batches().count(), 2);
    }
}
