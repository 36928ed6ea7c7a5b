//! Main entry point for gridstore.
//!
//! This module provides the `Grid` struct: one in-process cluster serving a
//! transactional cache, plus the operator-facing recovery calls.

use crate::error::{Error, Result};
use gridstore_core::{GridConfig, TransactionProtocol, TxnId};
use gridstore_durability::Decision;
use gridstore_engine::{
    Cache, Cluster, ClusterBuilder, InDoubtTransaction, OwnershipProvider,
};
use std::path::Path;
use std::sync::Arc;

/// A running grid.
///
/// # Example
///
/// ```ignore
/// use gridstore::prelude::*;
///
/// let grid = Grid::builder().nodes(3).write_skew_check().open()?;
/// let cache = grid.cache(0)?;
/// let mut session = cache.session();
///
/// cache.transaction_manager().begin(&mut session)?;
/// cache.put(&session, "k", "v")?;
/// cache.transaction_manager().commit(&mut session)?;
/// ```
#[derive(Debug, Clone)]
pub struct Grid {
    pub(crate) inner: Arc<Cluster>,
}

impl Grid {
    /// Start a grid of `nodes` nodes with default settings.
    pub fn open(nodes: u32) -> Result<Self> {
        Self::builder().nodes(nodes).open()
    }

    /// Create a builder for grid configuration.
    pub fn builder() -> GridBuilder {
        GridBuilder::new()
    }

    /// Cache handle served by node `node`.
    pub fn cache(&self, node: u32) -> Result<Cache> {
        self.inner.cache(node).map_err(Error::from)
    }

    /// The underlying cluster, for fault injection and inspection.
    pub fn cluster(&self) -> &Cluster {
        &self.inner
    }

    /// Crash node `node`; survivors mark its undecided transactions in doubt.
    pub fn crash_node(&self, node: u32) -> Result<()> {
        self.inner.crash_node(node).map_err(Error::from)
    }

    /// Transactions whose coordinator can no longer decide them.
    pub fn list_in_doubt(&self) -> Vec<InDoubtTransaction> {
        self.inner.recovery().list_in_doubt()
    }

    /// Commit an in-doubt transaction on every live node.
    pub fn force_commit(&self, txn_id: TxnId) -> Result<()> {
        self.inner.recovery().force_commit(txn_id).map_err(Error::from)
    }

    /// Roll back an in-doubt transaction on every live node.
    pub fn force_rollback(&self, txn_id: TxnId) -> Result<()> {
        self.inner.recovery().force_rollback(txn_id).map_err(Error::from)
    }

    /// Complete an in-doubt transaction from what live participants applied.
    pub fn resolve_from_participants(&self, txn_id: TxnId) -> Result<Option<Decision>> {
        self.inner
            .recovery()
            .resolve_from_participants(txn_id)
            .map_err(Error::from)
    }

    /// Whether nothing is in flight on any live node.
    pub fn is_quiescent(&self) -> bool {
        self.inner.is_quiescent()
    }

    /// Stop every node.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}

/// Builder for [`Grid`].
///
/// # Example
///
/// ```ignore
/// let grid = Grid::builder()
///     .nodes(4)
///     .total_order()
///     .write_skew_check()
///     .invocation_batching()
///     .open()?;
/// ```
#[derive(Debug, Default)]
pub struct GridBuilder {
    inner: ClusterBuilder,
    config: GridConfig,
}

impl GridBuilder {
    /// Three nodes, default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn nodes(mut self, nodes: u32) -> Self {
        self.inner = self.inner.nodes(nodes);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        self.config = GridConfig::from_file(path)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(self)
    }

    /// Commit multi-owner transactions through the total-order sequencer.
    pub fn total_order(mut self) -> Self {
        self.config = self.config.with_protocol(TransactionProtocol::TotalOrder);
        self
    }

    /// Repeatable read with versioned write-skew validation.
    pub fn write_skew_check(mut self) -> Self {
        self.config = self.config.with_write_skew_check(true);
        self
    }

    /// Allow `start_batch` / `end_batch`.
    pub fn invocation_batching(mut self) -> Self {
        self.config = self.config.with_invocation_batching(true);
        self
    }

    /// Use a custom key-to-owner mapping.
    pub fn ownership(mut self, provider: impl OwnershipProvider + 'static) -> Self {
        self.inner = self.inner.ownership(provider);
        self
    }

    /// Start the grid.
    pub fn open(self) -> Result<Grid> {
        let protocol = self.config.transaction.protocol;
        let cluster = self.inner.config(self.config).build()?;
        tracing::info!(
            cluster = %cluster.id(),
            nodes = cluster.nodes().len(),
            protocol = ?protocol,
            "grid opened"
        );
        Ok(Grid {
            inner: Arc::new(cluster),
        })
    }
}
