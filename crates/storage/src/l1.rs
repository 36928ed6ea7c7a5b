//! L1 (near-cache) bookkeeping
//!
//! Two halves of the same protocol live on different nodes:
//!
//! - [`L1Directory`] on the owner: key → nodes that fetched a copy.
//! - [`NearCache`] on the requestor: the copies themselves.
//!
//! When the owner commits a write to a key it drains the key's requestors
//! from the directory and sends each an invalidation. A requestor is listed
//! again only after its next remote read.

use dashmap::DashMap;
use gridstore_core::{Key, NodeId, VersionedValue};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Owner-side directory of cached copies
#[derive(Debug, Default)]
pub struct L1Directory {
    requestors: DashMap<Key, FxHashSet<NodeId>>,
}

impl L1Directory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node` now holds a copy of `key`
    pub fn register(&self, key: &Key, node: NodeId) {
        self.requestors.entry(key.clone()).or_default().insert(node);
    }

    /// Remove and return every requestor of `key`
    pub fn take_requestors(&self, key: &Key) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .requestors
            .remove(key)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();
        nodes.sort();
        nodes
    }

    /// Drain requestors for several keys, grouped by node
    ///
    /// Each node appears once with all of its keys, so one invalidation
    /// message per node suffices.
    pub fn take_invalidations(&self, keys: &[Key], exclude: NodeId) -> Vec<(NodeId, Vec<Key>)> {
        let mut by_node: FxHashMap<NodeId, Vec<Key>> = FxHashMap::default();
        for key in keys {
            for node in self.take_requestors(key) {
                if node != exclude {
                    by_node.entry(node).or_default().push(key.clone());
                }
            }
        }
        let mut grouped: Vec<_> = by_node.into_iter().collect();
        grouped.sort_by_key(|(node, _)| *node);
        grouped
    }

    /// Current requestors of `key`, sorted
    pub fn requestors(&self, key: &Key) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .requestors
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        nodes.sort();
        nodes
    }

    /// Drop a departed node from every entry
    pub fn forget_node(&self, node: NodeId) {
        let before = self.requestors.len();
        self.requestors.retain(|_, set| {
            set.remove(&node);
            !set.is_empty()
        });
        tracing::debug!(node = %node, dropped = before - self.requestors.len(), "forgot L1 requestor");
    }

    /// Number of keys with at least one requestor
    pub fn len(&self) -> usize {
        self.requestors.len()
    }

    /// Whether no key is cached anywhere
    pub fn is_empty(&self) -> bool {
        self.requestors.is_empty()
    }
}

/// Requestor-side near cache
///
/// A remote read races with invalidations: the owner may commit and
/// invalidate after serving the read but before the copy is stored here.
/// Fetches therefore take an epoch ticket first; a copy is stored only if no
/// invalidation happened since the ticket was issued.
#[derive(Debug, Default)]
pub struct NearCache {
    entries: DashMap<Key, VersionedValue>,
    epoch: AtomicU64,
}

impl NearCache {
    /// Create an empty near cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached copy of `key`
    pub fn get(&self, key: &Key) -> Option<VersionedValue> {
        self.entries.get(key).map(|v| v.clone())
    }

    /// Ticket to present when storing a fetched copy
    pub fn begin_fetch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Store a fetched copy unless an invalidation raced with the fetch
    ///
    /// Returns whether the copy was stored.
    pub fn complete_fetch(&self, ticket: u64, key: Key, value: VersionedValue) -> bool {
        if self.epoch.load(Ordering::Acquire) != ticket {
            tracing::trace!(key = ?key, ticket, "near-cache fetch lost to invalidation");
            return false;
        }
        self.entries.insert(key.clone(), value);
        // An invalidation that slipped in after the check must still win
        if self.epoch.load(Ordering::Acquire) != ticket {
            self.entries.remove(&key);
            tracing::trace!(key = ?key, ticket, "near-cache fetch lost to invalidation");
            return false;
        }
        true
    }

    /// Drop copies of `keys`
    pub fn invalidate(&self, keys: &[Key]) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        for key in keys {
            self.entries.remove(key);
        }
    }

    /// Drop copies of every key matching `stale`; returns how many went
    pub fn invalidate_where(&self, mut stale: impl FnMut(&Key) -> bool) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let before = self.entries.len();
        self.entries.retain(|key, _| !stale(key));
        before.saturating_sub(self.entries.len())
    }

    /// Drop every copy
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Whether a copy of `key` is held
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of cached copies
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
