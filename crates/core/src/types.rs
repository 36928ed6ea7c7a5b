//! Identifier types used throughout the grid
//!
//! - [`NodeId`]: a cluster member
//! - [`TxnId`]: a transaction, unique cluster-wide
//! - [`Key`]: a user key in the partitioned keyspace

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cluster member
///
/// Node ids are assigned by the cluster at startup and never reused while the
/// cluster is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Raw numeric id
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Unique identifier for a transaction
///
/// A transaction id is the node that created the transaction plus a counter
/// that is monotonic on that node. Ids are therefore unique across the
/// cluster without any coordination.
///
/// # Examples
///
/// ```
/// use gridstore_core::types::{NodeId, TxnId};
///
/// let a = TxnId::new(NodeId(1), 7);
/// let b = TxnId::new(NodeId(2), 7);
/// assert_ne!(a, b);
/// assert_eq!(a.to_string(), "tx:1:7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId {
    /// Node that created the transaction
    pub origin: NodeId,
    /// Per-node counter
    pub counter: u64,
}

impl TxnId {
    /// Create a transaction id
    pub fn new(origin: NodeId, counter: u64) -> Self {
        Self { origin, counter }
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}:{}", self.origin.0, self.counter)
    }
}

/// Key in the grid keyspace
///
/// Keys are ordered so that multi-key operations (lock acquisition, commit
/// application) can always visit them in one canonical order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Create a key from anything string-like
    pub fn new(name: impl Into<String>) -> Self {
        Key(name.into())
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key bytes, used for ownership hashing
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s)
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key(s.clone())
    }
}
