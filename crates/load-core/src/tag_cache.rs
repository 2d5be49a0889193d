//! Concurrent surrogate-id assignment for unique tag tuples.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A unique tag tuple and the surrogate id assigned to it.
///
/// Records are immutable once assigned: for the lifetime of a run a
/// tuple maps to exactly one id, ids are never reused, and they are
/// handed out contiguously from 1 in first-assignment order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub key: String,
    pub id: i64,
}

struct Inner {
    ids: HashMap<String, i64>,
    next_id: i64,
}

/// Shared cache assigning dense integer ids to unique tag tuples.
///
/// All shards funnel into one logical tags dimension, so this is
/// cross-worker shared state. Lookups dominate once the tag universe
/// stabilizes, so id assignment runs in two phases: an optimistic
/// presence scan under the read lock, and an exclusive re-check plus
/// insert only when that scan found candidates. The re-check is
/// mandatory: another worker may have inserted a candidate between
/// the phases.
pub struct TagCache {
    inner: RwLock<Inner>,
}

impl TagCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                ids: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Ensure every key has an id, returning only the records that
    /// were genuinely new. The caller must persist the returned
    /// records before committing any fact rows that reference them.
    pub fn assign<'a, I>(&self, keys: I) -> Vec<TagRecord>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut candidates: Vec<&str> = Vec::new();
        {
            let inner = self.read();
            for key in keys {
                if !inner.ids.contains_key(key) {
                    candidates.push(key);
                }
            }
        }
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut new_records = Vec::with_capacity(candidates.len());
        let mut inner = self.write();
        for key in candidates {
            if inner.ids.contains_key(key) {
                continue;
            }
            let id = inner.next_id;
            inner.next_id += 1;
            inner.ids.insert(key.to_string(), id);
            new_records.push(TagRecord {
                key: key.to_string(),
                id,
            });
        }
        new_records
    }

    /// Look up the ids for a slice of keys under one read lock.
    /// Returns `None` for keys that were never assigned.
    pub fn resolve<'a, I>(&self, keys: I) -> Vec<Option<i64>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let inner = self.read();
        keys.into_iter().map(|k| inner.ids.get(k).copied()).collect()
    }

    /// Id for a single key, if assigned.
    pub fn get(&self, key: &str) -> Option<i64> {
        self.read().ids.get(key).copied()
    }

    /// Number of distinct tuples seen so far.
    pub fn len(&self) -> usize {
        self.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Nothing panics while a guard is held, so a poisoned lock can
    // only carry consistent state; recover it instead of unwinding.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for TagCache {
    fn default() -> Self {
        Self::new()
    }
}
