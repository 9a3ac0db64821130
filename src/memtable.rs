//! The LSM tree's in-memory write buffer.
//!
//! Grounded on the reference engine's `mem_table.rs`: keeps the
//! `crossbeam_skiplist::SkipMap` backing store and the `approximate_size`
//! atomic counter, but drops the WAL plumbing (this crate's durability
//! story stops at "flushed to an SSTable", per spec) and the
//! self-referential range-scan iterator (`ouroboros`) — the LSM tree here
//! never needs an ordered range scan, only point lookups and "drain
//! everything for a flush".

use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::key::Key;

/// A mutable, lexicographically-ordered `key -> value` buffer bounded by
/// entry count (`memtable_size_limit`, enforced by the owning `LSMTree`).
pub struct MemTable<V> {
    id: u64,
    map: Arc<SkipMap<Key, V>>,
    len: AtomicUsize,
}

impl<V: Clone + Send + Sync + 'static> MemTable<V> {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            map: Arc::new(SkipMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn get(&self, key: &Key) -> Option<V> {
        self.map.get(key).map(|e| e.value().clone())
    }

    /// Inserts or overwrites `key`. Returns the memtable's entry count after
    /// the write, so the caller can decide whether to rotate.
    pub fn put(&self, key: Key, value: V) -> usize {
        let existed = self.map.contains_key(&key);
        self.map.insert(key, value);
        if !existed {
            self.len.fetch_add(1, Ordering::SeqCst);
        }
        self.len.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, in ascending key order, for flushing to an SSTable.
    pub fn entries(&self) -> Vec<(Key, V)> {
        self.map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
