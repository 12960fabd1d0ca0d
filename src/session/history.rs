//! Rolling reading history kept by a client session

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::telemetry::Reading;

/// Readings a session keeps when nothing else is configured
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One reading as the session received it
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub reading: Reading,
    /// Local receipt time; the reading's own timestamp may be device clock
    pub received_at: DateTime<Utc>,
}

/// Fixed-capacity FIFO of the most recent readings
#[derive(Debug, Clone)]
pub struct RollingHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl RollingHistory {
    /// A zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading received now
    pub fn push(&mut self, reading: Reading) -> Option<HistoryEntry> {
        self.push_at(reading, Utc::now())
    }

    /// Append a reading, returning the entry evicted to make room
    pub fn push_at(&mut self, reading: Reading, received_at: DateTime<Utc>) -> Option<HistoryEntry> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(HistoryEntry {
            reading,
            received_at,
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Owned copy, oldest first
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
