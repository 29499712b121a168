// Commit Log
//
// Append-only record of every batch committed to a dimension store.
// Load dates in the log are strictly increasing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// One committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub commit_id: Uuid,
    pub load_date: NaiveDate,
    pub expired: usize,
    pub inserted: usize,
}

impl CommitRecord {
    pub fn new(load_date: NaiveDate, expired: usize, inserted: usize) -> Self {
        Self {
            commit_id: Uuid::new_v4(),
            load_date,
            expired,
            inserted,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("commit for {attempted} is not after last committed load date {last}")]
    OutOfOrder { last: NaiveDate, attempted: NaiveDate },
}

#[derive(Debug, Default, Clone)]
pub struct CommitLog {
    records: VecDeque<CommitRecord>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    pub fn append(&mut self, record: CommitRecord) -> Result<(), LogError> {
        if let Some(last) = self.last_load_date() {
            if record.load_date <= last {
                return Err(LogError::OutOfOrder {
                    last,
                    attempted: record.load_date,
                });
            }
        }

        self.records.push_back(record);
        Ok(())
    }

    pub fn replay(&self) -> impl Iterator<Item = &CommitRecord> {
        self.records.iter()
    }

    pub fn last_load_date(&self) -> Option<NaiveDate> {
        self.records.back().map(|r| r.load_date)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn append_and_replay() {
        let mut log = CommitLog::new();

        log.append(CommitRecord::new(date("2025-12-20"), 0, 3)).unwrap();
        log.append(CommitRecord::new(date("2025-12-25"), 1, 1)).unwrap();

        let records: Vec<_> = log.replay().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(log.last_load_date(), Some(date("2025-12-25")));
    }

    #[test]
    fn repeated_load_date_is_rejected() {
        let mut log = CommitLog::new();
        log.append(CommitRecord::new(date("2025-12-20"), 0, 1)).unwrap();

        let err = log
            .append(CommitRecord::new(date("2025-12-20"), 0, 1))
            .unwrap_err();

        assert_eq!(
            err,
            LogError::OutOfOrder {
                last: date("2025-12-20"),
                attempted: date("2025-12-20"),
            }
        );
        assert_eq!(log.len(), 1);
    }
}
