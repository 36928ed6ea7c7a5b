//! Node-to-node transport
//!
//! [`Transport`] is the boundary to the raw network: reliable, ordered,
//! point-to-point request/response with failure reported as
//! [`Error::NodeUnavailable`]. [`InMemoryTransport`] connects nodes living in
//! one process.
//!
//! # Fault injection
//!
//! | Method | Effect |
//! |--------|--------|
//! | `mark_down(node)` | every call to or from `node` fails |
//! | `block_link(from, to)` | calls on one directed link fail |
//! | `crash_after(node, kind, n)` | `node` goes down when it sends its `n+1`-th message of `kind` |

use crate::messages::{ClusterMessage, MessageKind};
use gridstore_core::{Error, NodeId, Result};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receives messages addressed to one node
pub trait MessageHandler: Send + Sync {
    /// Handle `message` from `from` and produce the response
    fn handle(&self, from: NodeId, message: ClusterMessage) -> Result<ClusterMessage>;
}

/// Point-to-point delivery between nodes
pub trait Transport: Send + Sync {
    /// Deliver `message` and wait for the response
    fn call(&self, from: NodeId, to: NodeId, message: &ClusterMessage) -> Result<ClusterMessage>;

    /// Deliver `message`, discarding the response
    fn send(&self, from: NodeId, to: NodeId, message: &ClusterMessage) -> Result<()> {
        self.call(from, to, message).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
struct CrashPoint {
    node: NodeId,
    kind: MessageKind,
    remaining: usize,
}

/// Transport between nodes of the same process
///
/// Handlers are held weakly so a dropped node simply becomes unreachable.
/// Every message and every response is encoded to MessagePack and decoded
/// again on the far side.
#[derive(Default)]
pub struct InMemoryTransport {
    handlers: RwLock<FxHashMap<NodeId, Weak<dyn MessageHandler>>>,
    down: RwLock<FxHashSet<NodeId>>,
    blocked: RwLock<FxHashSet<(NodeId, NodeId)>>,
    crash_points: Mutex<Vec<CrashPoint>>,
    sent: AtomicU64,
    sent_by_kind: Mutex<FxHashMap<MessageKind, u64>>,
}

impl InMemoryTransport {
    /// Create a transport with no nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` as node `node`
    pub fn register(&self, node: NodeId, handler: &Arc<dyn MessageHandler>) {
        self.handlers.write().insert(node, Arc::downgrade(handler));
        self.down.write().remove(&node);
    }

    /// Take `node` off the network
    pub fn mark_down(&self, node: NodeId) {
        tracing::info!(node = %node, "node marked down");
        self.down.write().insert(node);
    }

    /// Whether `node` is off the network
    pub fn is_down(&self, node: NodeId) -> bool {
        self.down.read().contains(&node)
    }

    /// Drop everything sent from `from` to `to`
    pub fn block_link(&self, from: NodeId, to: NodeId) {
        self.blocked.write().insert((from, to));
    }

    /// Undo [`InMemoryTransport::block_link`]
    pub fn heal_link(&self, from: NodeId, to: NodeId) {
        self.blocked.write().remove(&(from, to));
    }

    /// Crash `node` when it tries to send a message of `kind` after `delivered` successful ones
    pub fn crash_after(&self, node: NodeId, kind: MessageKind, delivered: usize) {
        self.crash_points.lock().push(CrashPoint {
            node,
            kind,
            remaining: delivered,
        });
    }

    /// Total messages delivered
    pub fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages of `kind` delivered
    pub fn messages_of(&self, kind: MessageKind) -> u64 {
        self.sent_by_kind.lock().get(&kind).copied().unwrap_or(0)
    }

    fn check_crash_point(&self, from: NodeId, kind: MessageKind) -> bool {
        let mut points = self.crash_points.lock();
        let Some(index) = points.iter().position(|p| p.node == from && p.kind == kind) else {
            return false;
        };
        if points[index].remaining == 0 {
            points.remove(index);
            return true;
        }
        points[index].remaining -= 1;
        false
    }

    fn handler(&self, from: NodeId, to: NodeId) -> Result<Arc<dyn MessageHandler>> {
        {
            let down = self.down.read();
            if down.contains(&from) {
                return Err(Error::NodeUnavailable(from));
            }
            if down.contains(&to) {
                return Err(Error::NodeUnavailable(to));
            }
        }
        if self.blocked.read().contains(&(from, to)) {
            return Err(Error::NodeUnavailable(to));
        }
        self.handlers
            .read()
            .get(&to)
            .and_then(Weak::upgrade)
            .ok_or(Error::NodeUnavailable(to))
    }
}

impl Transport for InMemoryTransport {
    fn call(&self, from: NodeId, to: NodeId, message: &ClusterMessage) -> Result<ClusterMessage> {
        let kind = message.kind();
        if self.check_crash_point(from, kind) {
            tracing::warn!(node = %from, %kind, "crash point reached");
            self.mark_down(from);
            return Err(Error::NodeUnavailable(from));
        }

        let handler = self.handler(from, to)?;
        let inbound = ClusterMessage::decode(&message.encode()?)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        *self.sent_by_kind.lock().entry(kind).or_insert(0) += 1;
        tracing::trace!(from = %from, to = %to, %kind, "deliver");

        let response = handler.handle(from, inbound)?;
        ClusterMessage::decode(&response.encode()?)
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("nodes", &self.handlers.read().len())
            .field("down", &self.down.read().len())
            .field("sent", &self.messages_sent())
            .finish()
    }
}
