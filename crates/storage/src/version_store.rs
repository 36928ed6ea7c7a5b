//! Versioned entry store
//!
//! DashMap keyed by [`Key`]: lock-free reads, writes lock only the key's
//! shard. Every committed write bumps the key's version by one.
//!
//! # Versions
//!
//! - A key that was never written has no version.
//! - The first write produces version 1.
//! - A removal keeps a tombstone carrying the next version, so the version
//!   of a key never repeats even if it is removed and written again.

use chrono::Utc;
use dashmap::DashMap;
use gridstore_core::{Key, ReadResult, Value, VersionedValue, WriteOp};

/// Entry as stored: a live value or a tombstone
#[derive(Debug, Clone)]
struct StoredEntry {
    value: Option<Value>,
    version: u64,
    timestamp: i64,
}

/// Outcome of applying one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedWrite {
    /// Key written
    pub key: Key,
    /// Version assigned by this write
    pub version: u64,
}

/// Committed entries of one node
///
/// # Thread Safety
///
/// All operations are thread-safe. `apply` holds the key's shard lock for the
/// read-increment-write of the version, so two writers to the same key can
/// never produce the same version. Callers still serialize validation and
/// apply per key themselves (lock table or total-order queue).
pub struct VersionStore {
    entries: DashMap<Key, StoredEntry>,
}

impl VersionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Live value and version of a key
    ///
    /// Tombstones read as absent.
    #[inline]
    pub fn get(&self, key: &Key) -> Option<VersionedValue> {
        self.entries.get(key).and_then(|entry| {
            entry.value.clone().map(|value| VersionedValue {
                value,
                version: entry.version,
                timestamp: entry.timestamp,
            })
        })
    }

    /// Value and version, including the version of a tombstone
    #[inline]
    pub fn read(&self, key: &Key) -> ReadResult {
        self.entries
            .get(key)
            .map(|entry| ReadResult {
                value: entry.value.clone(),
                version: Some(entry.version),
            })
            .unwrap_or_default()
    }

    /// Current version of a key (tombstones included)
    #[inline]
    pub fn version_of(&self, key: &Key) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.version)
    }

    /// Whether the key has a live value
    pub fn contains(&self, key: &Key) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.value.is_some())
            .unwrap_or(false)
    }

    /// Apply one committed write and return the version it received
    pub fn apply(&self, key: &Key, op: &WriteOp) -> AppliedWrite {
        let value = op.visible_value().cloned();
        let timestamp = Utc::now().timestamp_millis();
        let mut slot = self.entries.entry(key.clone()).or_insert(StoredEntry {
            value: None,
            version: 0,
            timestamp,
        });
        slot.version += 1;
        slot.value = value;
        slot.timestamp = timestamp;
        AppliedWrite {
            key: key.clone(),
            version: slot.version,
        }
    }

    /// Apply a batch of writes in key order
    pub fn apply_batch(&self, writes: &[(Key, WriteOp)]) -> Vec<AppliedWrite> {
        let mut ordered: Vec<&(Key, WriteOp)> = writes.iter().collect();
        ordered.sort_by(|(a, _), (b, _)| a.cmp(b));
        ordered.into_iter().map(|(key, op)| self.apply(key, op)).collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().value.is_some()).count()
    }

    /// Whether there are no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live keys, sorted
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .entries
            .iter()
            .filter(|e| e.value().value.is_some())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("entries", &self.entries.len())
            .field("live", &self.len())
            .finish()
    }
}
