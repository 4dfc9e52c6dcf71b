//! Versioned snapshots and the sharded in-memory map behind both stores.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;

use crate::error::{StoreError, StoreResult};

/// Maximum attempts of a read-modify-write loop before giving up.
pub const MAX_MODIFY_ATTEMPTS: usize = 8;

/// An owned copy of a stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Values that carry an absolute expiration time.
pub trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }
}

/// Concurrent map with per-entry versions and compare-and-swap updates.
///
/// Locking is per shard. No lock is held across an `.await`.
#[derive(Debug)]
pub(crate) struct VersionedMap<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Versioned<V>>,
}

impl<K, V> Default for VersionedMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> VersionedMap<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone + Expiring,
{
    pub(crate) fn insert_new(&self, key: K, value: V) -> StoreResult<()> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Err(StoreError::Duplicate(entry.key().to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Versioned { version: 1, value });
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, key: &K) -> StoreResult<Versioned<V>> {
        let snapshot = self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if snapshot.value.is_expired() {
            self.entries
                .remove_if(key, |_, current| current.version == snapshot.version);
            return Err(StoreError::Expired(key.to_string()));
        }
        Ok(snapshot)
    }

    pub(crate) fn compare_and_swap(&self, key: &K, expected: u64, value: V) -> StoreResult<u64> {
        let mut entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if entry.version != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                actual: entry.version,
            });
        }
        entry.version += 1;
        entry.value = value;
        Ok(entry.version)
    }

    pub(crate) fn remove(&self, key: &K) -> StoreResult<V> {
        self.entries
            .remove(key)
            .map(|(_, snapshot)| snapshot.value)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub(crate) fn retain_unexpired(&self) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|_, snapshot| !snapshot.value.is_expired());
        before.saturating_sub(self.entries.len()) as u64
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
