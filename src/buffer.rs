//! Records and the correlation pool.
//!
//! The pool keeps candidate trigger records ordered by the timestamp they
//! carry, not by arrival, so late deliveries still land in the right place.
//! Ties keep arrival order.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::time::Timestamp;
use crate::value::Message;

/// An observed, matched event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Topic the message arrived on.
    pub topic: String,
    /// Timestamp carried by the message.
    pub timestamp: Timestamp,
    /// The matched payload.
    pub message: Message,
    /// Alias the message is bound to, if the matching event declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        timestamp: Timestamp,
        message: Message,
        alias: Option<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            timestamp,
            message,
            alias,
        }
    }
}

/// How many records the pool may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// No buffering.
    Zero,
    /// A single pending record.
    One,
    /// Unbounded; entries leave by consumption or time-based eviction.
    Unbounded,
}

impl Capacity {
    /// Maximum number of records, `None` if unbounded.
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Zero => Some(0),
            Self::One => Some(1),
            Self::Unbounded => None,
        }
    }
}

/// Timestamp-ordered record buffer.
#[derive(Debug, Clone)]
pub struct Pool {
    capacity: Capacity,
    entries: BTreeMap<(Timestamp, u64), Record>,
    seq: u64,
}

impl Pool {
    /// Empty pool with the given capacity.
    #[must_use]
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
            seq: 0,
        }
    }

    /// Capacity the pool was created with.
    #[must_use]
    pub const fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Number of pooled records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pooled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a record in timestamp order.
    ///
    /// # Panics
    ///
    /// Panics if the pool is already at capacity; compiled rules never push
    /// into a full pool.
    pub fn push(&mut self, record: Record) {
        if let Some(limit) = self.capacity.limit() {
            assert!(
                self.entries.len() < limit,
                "pool overflow: capacity {:?} already holds {} record(s)",
                self.capacity,
                self.entries.len()
            );
        }
        let key = (record.timestamp, self.seq);
        self.seq = self.seq.wrapping_add(1);
        self.entries.insert(key, record);
    }

    /// Stores `record` in place of the pooled records, unless a pooled record
    /// carries a later timestamp. Returns whether `record` was stored.
    pub fn replace(&mut self, record: Record) -> bool {
        if self.newest().is_some_and(|newest| newest.timestamp > record.timestamp) {
            return false;
        }
        self.entries.clear();
        self.push(record);
        true
    }

    /// Drops every pooled record.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Oldest record by carried timestamp.
    #[must_use]
    pub fn oldest(&self) -> Option<&Record> {
        self.entries.values().next()
    }

    /// Record with the latest timestamp.
    #[must_use]
    pub fn newest(&self) -> Option<&Record> {
        self.entries.values().next_back()
    }

    /// Pooled records, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Record> {
        self.entries.values()
    }

    /// Most recent first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Record> {
        self.entries.values().rev()
    }

    /// Removes every record accepted by `pred`, testing the newest first.
    ///
    /// Returns the removed records in the order they were tested.
    pub fn consume_where(&mut self, mut pred: impl FnMut(&Record) -> bool) -> Vec<Record> {
        let keys: Vec<(Timestamp, u64)> = self
            .entries
            .iter()
            .rev()
            .filter(|(_, r)| pred(*r))
            .map(|(k, _)| *k)
            .collect();
        keys.iter().filter_map(|k| self.entries.remove(k)).collect()
    }

    /// Evicts records at least `max_age` older than `now`, front first.
    pub fn evict_expired(&mut self, now: Timestamp, max_age: Duration) -> usize {
        let mut evicted = 0;
        while let Some(entry) = self.entries.first_entry() {
            if now - entry.get().timestamp < max_age {
                break;
            }
            entry.remove();
            evicted += 1;
        }
        evicted
    }
}
