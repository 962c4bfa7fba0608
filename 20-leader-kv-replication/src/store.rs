//! In-memory key-value storage owned by each replica.
//!
//! The store is plain data: it never talks to peers and performs no
//! validation. The leader writes into it when it accepts a PUT, followers
//! write into it when they apply a REPLICATION message.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::message::Timestamp;

/// The last-written state of one key on one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub value: String,
    pub timestamp: Timestamp,
}

/// Thread-safe key-value store used by each replica.
///
/// A single lock guards both lookups and writes. Contention is low: every
/// request touches one key and holds the lock only for a map operation.
#[derive(Debug, Default)]
pub struct KvStore {
    data: Mutex<BTreeMap<String, Record>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the record for `key`.
    ///
    /// Last write wins: the leader is the only place timestamps are assigned,
    /// and it applies and replicates writes in timestamp order.
    pub fn put(&self, key: String, value: String, timestamp: Timestamp) {
        self.data.lock().insert(key, Record { value, timestamp });
    }

    /// Returns `None` if the key was never written on this replica.
    pub fn get(&self, key: &str) -> Option<Record> {
        self.data.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Copies the whole map so callers can iterate without holding the lock.
    pub fn snapshot(&self) -> BTreeMap<String, Record> {
        self.data.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_is_absent() {
        let store = KvStore::new();
        assert_eq!(store.get("missing"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn put_overwrites_unconditionally() {
        let store = KvStore::new();
        store.put("k".into(), "new".into(), 20);
        store.put("k".into(), "old".into(), 10);

        assert_eq!(
            store.get("k"),
            Some(Record {
                value: "old".into(),
                timestamp: 10
            })
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn equal_timestamps_are_accepted() {
        let store = KvStore::new();
        store.put("k".into(), "a".into(), 5);
        store.put("k".into(), "b".into(), 5);
        assert_eq!(store.get("k").map(|record| record.value), Some("b".into()));
    }

    #[test]
    fn snapshot_is_detached_from_the_store() {
        let store = KvStore::new();
        store.put("a".into(), "1".into(), 1);
        let snapshot = store.snapshot();
        store.put("b".into(), "2".into(), 2);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }
}
