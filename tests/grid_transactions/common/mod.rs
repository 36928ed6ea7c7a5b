//! Shared helpers for grid integration tests

#![allow(dead_code)]

pub use gridstore::engine::{
    ClusterBuilder, ClusterMessage, GridNode, MessageHandler, MessageKind, PrepareRequest,
    StaticOwnership,
};
pub use gridstore::prelude::*;
pub use gridstore_core::{Error as CoreError, WriteOp};
pub use std::sync::Arc;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A grid plus shortcuts used across the suite
pub struct TestGrid {
    pub grid: Grid,
}

impl TestGrid {
    /// `nodes` nodes, default configuration
    pub fn new(nodes: u32) -> Self {
        Self::with(Grid::builder().nodes(nodes))
    }

    /// Grid from a prepared builder
    pub fn with(builder: GridBuilder) -> Self {
        init_tracing();
        let grid = builder.open().expect("Failed to start grid");
        Self { grid }
    }

    pub fn cache(&self, node: u32) -> Cache {
        self.grid.cache(node).expect("node is down")
    }

    pub fn node(&self, node: u32) -> Arc<GridNode> {
        self.grid.cluster().node(node).expect("no such node")
    }

    /// Committed value of `key` as seen from `node`, outside any transaction
    pub fn read(&self, node: u32, key: &str) -> Option<Value> {
        let cache = self.cache(node);
        let session = cache.session();
        cache.get(&session, key).expect("read failed")
    }

    /// Value stored in `node`'s own version store
    pub fn stored(&self, node: u32, key: &str) -> Option<Value> {
        self.node(node).store().get(&Key::from(key)).map(|v| v.value)
    }

    /// Version held in `node`'s own version store
    pub fn stored_version(&self, node: u32, key: &str) -> Option<u64> {
        self.node(node).store().version_of(&Key::from(key))
    }

    /// Auto-commit `value` under `key` from `node`
    pub fn put(&self, node: u32, key: &str, value: impl Into<Value>) {
        let cache = self.cache(node);
        let session = cache.session();
        cache.put(&session, key, value).expect("put failed");
    }
}

/// `nodes` members, two owners per key, `pins` fixed
pub fn pinned(nodes: u32, pins: &[(&str, &[u32])]) -> StaticOwnership {
    pins.iter().fold(
        StaticOwnership::new((0..nodes).map(NodeId), 2),
        |ownership, (key, owners)| {
            let owners: Vec<NodeId> = owners.iter().copied().map(NodeId).collect();
            ownership.assign(*key, &owners)
        },
    )
}
