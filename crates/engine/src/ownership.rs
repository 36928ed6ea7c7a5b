//! Key ownership and membership
//!
//! An [`OwnershipProvider`] answers `owners_of(key)`: the nodes holding a
//! copy of the key, primary first. [`Membership`] layers the set of live
//! nodes on top and is what the rest of the engine consults.
//!
//! There is no state transfer: when an owner leaves, its keys are served by
//! the remaining owners only.

use gridstore_core::{Error, Key, NodeId, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Owners of one key, primary first
pub type OwnerSet = SmallVec<[NodeId; 4]>;

/// Maps keys to owning nodes
pub trait OwnershipProvider: Send + Sync + std::fmt::Debug {
    /// Owners of `key`, primary first
    fn owners_of(&self, key: &Key) -> OwnerSet;

    /// Every node the provider may assign keys to
    fn members(&self) -> Vec<NodeId>;
}

/// Rendezvous hashing over a fixed member list
///
/// Each member scores `xxh3(key, seed = node)`; the `num_owners` highest
/// scores own the key. Removing a member only moves the keys it owned.
#[derive(Debug, Clone)]
pub struct ConsistentHashOwnership {
    members: Vec<NodeId>,
    num_owners: usize,
}

impl ConsistentHashOwnership {
    /// Assign every key to `num_owners` of `members`
    pub fn new(members: impl IntoIterator<Item = NodeId>, num_owners: usize) -> Self {
        let mut members: Vec<NodeId> = members.into_iter().collect();
        members.sort();
        members.dedup();
        Self {
            members,
            num_owners: num_owners.max(1),
        }
    }

    fn score(key: &Key, node: NodeId) -> u64 {
        xxh3_64_with_seed(key.as_bytes(), u64::from(node.as_u32()))
    }
}

impl OwnershipProvider for ConsistentHashOwnership {
    fn owners_of(&self, key: &Key) -> OwnerSet {
        let mut scored: SmallVec<[(u64, NodeId); 8]> = self
            .members
            .iter()
            .map(|node| (Self::score(key, *node), *node))
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored
            .into_iter()
            .take(self.num_owners)
            .map(|(_, node)| node)
            .collect()
    }

    fn members(&self) -> Vec<NodeId> {
        self.members.clone()
    }
}

/// Explicit key placement, hashing everything else
///
/// Handy when a test needs to know exactly which nodes own a key.
#[derive(Debug, Clone)]
pub struct StaticOwnership {
    assigned: FxHashMap<Key, OwnerSet>,
    fallback: ConsistentHashOwnership,
}

impl StaticOwnership {
    /// Start from rendezvous hashing over `members`
    pub fn new(members: impl IntoIterator<Item = NodeId>, num_owners: usize) -> Self {
        Self {
            assigned: FxHashMap::default(),
            fallback: ConsistentHashOwnership::new(members, num_owners),
        }
    }

    /// Pin `key` to `owners`, primary first
    pub fn assign(mut self, key: impl Into<Key>, owners: &[NodeId]) -> Self {
        self.assigned.insert(key.into(), owners.iter().copied().collect());
        self
    }
}

impl OwnershipProvider for StaticOwnership {
    fn owners_of(&self, key: &Key) -> OwnerSet {
        match self.assigned.get(key) {
            Some(owners) => owners.clone(),
            None => self.fallback.owners_of(key),
        }
    }

    fn members(&self) -> Vec<NodeId> {
        self.fallback.members()
    }
}

/// Live view of the cluster
#[derive(Debug)]
pub struct Membership {
    provider: Arc<dyn OwnershipProvider>,
    live: RwLock<BTreeSet<NodeId>>,
}

impl Membership {
    /// Every member of `provider` starts live
    pub fn new(provider: Arc<dyn OwnershipProvider>) -> Self {
        let live = provider.members().into_iter().collect();
        Self {
            provider,
            live: RwLock::new(live),
        }
    }

    /// Live owners of `key`, primary first
    ///
    /// # Errors
    /// [`Error::NodeUnavailable`] naming the primary when no owner is live.
    pub fn live_owners(&self, key: &Key) -> Result<OwnerSet> {
        let owners = self.provider.owners_of(key);
        let live = self.live.read();
        let alive: OwnerSet = owners.iter().copied().filter(|n| live.contains(n)).collect();
        if alive.is_empty() {
            let primary = owners.first().copied().unwrap_or(NodeId(0));
            return Err(Error::NodeUnavailable(primary));
        }
        Ok(alive)
    }

    /// Whether `node` owns a copy of `key`
    pub fn is_owner(&self, node: NodeId, key: &Key) -> bool {
        self.provider.owners_of(key).contains(&node)
    }

    /// Whether `node` is live
    pub fn is_live(&self, node: NodeId) -> bool {
        self.live.read().contains(&node)
    }

    /// Remove a failed node; returns whether it was live
    pub fn mark_dead(&self, node: NodeId) -> bool {
        self.live.write().remove(&node)
    }

    /// Live nodes, sorted
    pub fn live_members(&self) -> Vec<NodeId> {
        self.live.read().iter().copied().collect()
    }
}
