//! Fixed-capacity, deduplicating, time-ordered record store.
//!
//! Records are keyed by [`RecordKey`], whose ordering is timestamp-first, so
//! the map iterates in ascending time order and eviction of the oldest record
//! is a `pop_first`. Live appends and backfills are both set merges keyed by
//! identity: the retained contents are always the `capacity` greatest keys of
//! everything ever merged since the last `initialize`, which makes repeated
//! delivery from either source harmless.

use std::collections::BTreeMap;

use crate::record::{identity_key, LogRecord, RecordKey, Timestamp};

/// Default number of records kept for display.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct RecordBuffer {
    records: BTreeMap<RecordKey, LogRecord>,
    capacity: usize,
}

impl RecordBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Replace the entire contents.
    ///
    /// The first occurrence of each identity key wins; only the most recent
    /// `capacity` records by time are kept.
    pub fn initialize<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = LogRecord>,
    {
        self.records.clear();
        for record in records {
            self.records.entry(identity_key(&record)).or_insert(record);
        }
        self.evict_overflow();
    }

    /// Insert a record arriving from the live channel.
    ///
    /// Returns `false` when the record was already present (no-op) or was
    /// older than everything in a full buffer and got evicted immediately.
    pub fn append_live(&mut self, record: LogRecord) -> bool {
        let key = identity_key(&record);
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key.clone(), record);
        self.evict_overflow();
        self.records.contains_key(&key)
    }

    /// Merge the result of a catch-up fetch.
    ///
    /// Absent records are inserted at their chronological position; present
    /// ones are left untouched. Returns how many of the given records are
    /// newly retained.
    pub fn merge_backfill<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = LogRecord>,
    {
        let mut inserted = Vec::new();
        for record in records {
            let key = identity_key(&record);
            if let std::collections::btree_map::Entry::Vacant(slot) = self.records.entry(key) {
                inserted.push(slot.key().clone());
                slot.insert(record);
            }
        }
        self.evict_overflow();
        inserted
            .iter()
            .filter(|key| self.records.contains_key(key))
            .count()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Current contents in ascending time order.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.values().cloned().collect()
    }

    /// Iterate the contents in ascending time order without cloning.
    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.values()
    }

    /// Timestamp of the newest record by time order.
    pub fn last_seen(&self) -> Option<Timestamp> {
        self.records.last_key_value().map(|(key, _)| key.timestamp)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn evict_overflow(&mut self) {
        while self.records.len() > self.capacity {
            if let Some((key, _)) = self.records.pop_first() {
                log::trace!("Evicted {key} (capacity {})", self.capacity);
            }
        }
    }
}

impl Default for RecordBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(secs: i64) -> LogRecord {
        LogRecord::new(Utc.timestamp_opt(secs, 0).unwrap(), format!("t={secs}"))
    }

    fn times(buffer: &RecordBuffer) -> Vec<i64> {
        buffer.iter().map(|r| r.timestamp.timestamp()).collect()
    }

    #[test]
    fn test_append_evicts_oldest() {
        let mut buffer = RecordBuffer::new(3);
        buffer.initialize(vec![rec(1), rec(2), rec(3)]);
        assert!(buffer.append_live(rec(4)));
        assert_eq!(times(&buffer), vec![2, 3, 4]);
    }

    #[test]
    fn test_backfill_skips_present() {
        let mut buffer = RecordBuffer::new(10);
        let mut original = rec(5);
        original.body = "original".into();
        buffer.initialize(vec![original]);

        let mut duplicate = rec(5);
        duplicate.body = "duplicate".into();
        let gained = buffer.merge_backfill(vec![duplicate, rec(6)]);

        assert_eq!(gained, 1);
        assert_eq!(times(&buffer), vec![5, 6]);
        assert_eq!(buffer.snapshot()[0].body, "original");
    }

    #[test]
    fn test_backfill_idempotent() {
        let mut once = RecordBuffer::new(4);
        once.initialize(vec![rec(3), rec(7)]);
        let batch = vec![rec(1), rec(4), rec(8), rec(9), rec(2)];
        once.merge_backfill(batch.clone());

        let mut twice = once.clone();
        let gained = twice.merge_backfill(batch);

        assert_eq!(gained, 0);
        assert_eq!(once.snapshot(), twice.snapshot());
        assert_eq!(times(&twice), vec![4, 7, 8, 9]);
    }

    #[test]
    fn test_append_live_duplicate_is_noop() {
        let mut buffer = RecordBuffer::new(3);
        assert!(buffer.append_live(rec(1)));
        assert!(!buffer.append_live(rec(1)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_append_out_of_order_lands_sorted() {
        let mut buffer = RecordBuffer::new(5);
        buffer.append_live(rec(10));
        buffer.append_live(rec(12));
        buffer.append_live(rec(11));
        assert_eq!(times(&buffer), vec![10, 11, 12]);
        assert_eq!(buffer.last_seen().unwrap().timestamp(), 12);
    }

    #[test]
    fn test_append_older_than_full_buffer_is_dropped() {
        let mut buffer = RecordBuffer::new(2);
        buffer.initialize(vec![rec(5), rec(6)]);
        assert!(!buffer.append_live(rec(1)));
        assert_eq!(times(&buffer), vec![5, 6]);
    }

    #[test]
    fn test_initialize_dedups_and_caps() {
        let mut buffer = RecordBuffer::new(3);
        buffer.append_live(rec(100));
        buffer.initialize(vec![rec(4), rec(1), rec(4), rec(3), rec(2), rec(5)]);
        assert_eq!(times(&buffer), vec![3, 4, 5]);
    }

    #[test]
    fn test_same_timestamp_distinct_spans_coexist() {
        let mut buffer = RecordBuffer::new(10);
        buffer.append_live(rec(1).with_trace("t", "a"));
        buffer.append_live(rec(1).with_trace("t", "b"));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = RecordBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(RecordBuffer::default().capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_empty_last_seen() {
        let buffer = RecordBuffer::new(3);
        assert!(buffer.last_seen().is_none());
        assert!(buffer.is_empty());
    }
}
