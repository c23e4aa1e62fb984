use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{collections::VecDeque, sync::Arc};
use thiserror::Error;

use crate::domain::Reading;

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("reading at {incoming} is older than history tail {tail}")]
    OutOfOrder {
        incoming: DateTime<Utc>,
        tail: DateTime<Utc>,
    },
}

/// Bounded, chronologically ordered buffer of recent readings.
///
/// Appends evict the oldest entry once `capacity` is reached. Readers copy
/// `Arc` handles out under a short read lock, so a reader never holds up an
/// append for longer than one buffer copy.
#[derive(Debug)]
pub struct HistoryStore {
    readings: RwLock<VecDeque<Arc<Reading>>>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append at the tail. Equal timestamps are accepted; older ones are refused.
    pub fn append(&self, reading: Arc<Reading>) -> Result<(), HistoryError> {
        let mut buf = self.readings.write();
        if let Some(tail) = buf.back() {
            if reading.timestamp < tail.timestamp {
                return Err(HistoryError::OutOfOrder {
                    incoming: reading.timestamp,
                    tail: tail.timestamp,
                });
            }
        }
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(reading);
        Ok(())
    }

    /// Last `k` readings, oldest first
    pub fn recent(&self, k: usize) -> Vec<Arc<Reading>> {
        let buf = self.readings.read();
        let start = buf.len().saturating_sub(k);
        buf.iter().skip(start).cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<Reading>> {
        self.readings.read().back().cloned()
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.readings.read().back().map(|r| r.timestamp)
    }

    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
