//! In-process cluster
//!
//! A [`Cluster`] wires N [`GridNode`]s to one transport, one membership view
//! and one sequencer. Node ids are `0..N`. It is also the failure injector:
//! [`Cluster::crash_node`] takes a node off the network and notifies the
//! survivors, which is what a membership service would do.

use crate::cache::Cache;
use crate::node::GridNode;
use crate::ownership::{ConsistentHashOwnership, Membership, OwnershipProvider};
use crate::recovery::RecoveryCoordinator;
use crate::sequencer::Sequencer;
use crate::transport::{InMemoryTransport, MessageHandler, Transport};
use gridstore_core::{Error, GridConfig, NodeId, Result, TxnId};
use std::sync::Arc;
use uuid::Uuid;

/// Default cache name
pub const DEFAULT_CACHE: &str = "default";

/// Builder for [`Cluster`]
#[derive(Debug)]
pub struct ClusterBuilder {
    nodes: u32,
    name: String,
    config: GridConfig,
    ownership: Option<Arc<dyn OwnershipProvider>>,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            nodes: 3,
            name: DEFAULT_CACHE.to_string(),
            config: GridConfig::default(),
            ownership: None,
        }
    }
}

impl ClusterBuilder {
    /// Three nodes, default configuration, consistent-hash ownership
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    /// Cache name reported by [`Cache::name`]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Grid configuration shared by every node
    pub fn config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace consistent hashing with a custom owner mapping
    pub fn ownership(mut self, provider: impl OwnershipProvider + 'static) -> Self {
        self.ownership = Some(Arc::new(provider));
        self
    }

    /// Validate the configuration and start every node
    pub fn build(self) -> Result<Cluster> {
        self.config.validate()?;
        if self.nodes == 0 {
            return Err(Error::Config("a cluster needs at least one node".into()));
        }

        let members: Vec<NodeId> = (0..self.nodes).map(NodeId).collect();
        let provider = self.ownership.unwrap_or_else(|| {
            Arc::new(ConsistentHashOwnership::new(
                members.iter().copied(),
                self.config.clustering.num_owners,
            ))
        });
        let config = Arc::new(self.config);
        let transport = Arc::new(InMemoryTransport::new());
        let membership = Arc::new(Membership::new(provider));
        let sequencer = Arc::new(Sequencer::new());

        let nodes: Vec<Arc<GridNode>> = members
            .iter()
            .map(|id| {
                let dyn_transport: Arc<dyn Transport> = transport.clone();
                let node = Arc::new(GridNode::new(
                    *id,
                    Arc::clone(&config),
                    dyn_transport,
                    Arc::clone(&membership),
                    Arc::clone(&sequencer),
                ));
                let handler: Arc<dyn MessageHandler> = node.clone();
                transport.register(*id, &handler);
                node
            })
            .collect();

        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: self.name,
            config,
            nodes,
            transport,
            membership,
            sequencer,
        };
        tracing::info!(
            cluster = %cluster.id,
            nodes = cluster.nodes.len(),
            protocol = ?cluster.config.transaction.protocol,
            "cluster started"
        );
        Ok(cluster)
    }
}

/// A running in-process cluster
pub struct Cluster {
    id: Uuid,
    name: String,
    config: Arc<GridConfig>,
    nodes: Vec<Arc<GridNode>>,
    transport: Arc<InMemoryTransport>,
    membership: Arc<Membership>,
    sequencer: Arc<Sequencer>,
}

impl Cluster {
    /// Cluster id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared configuration
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Node `id`, running or not
    pub fn node(&self, id: u32) -> Result<Arc<GridNode>> {
        self.nodes
            .get(id as usize)
            .cloned()
            .ok_or(Error::NodeUnavailable(NodeId(id)))
    }

    /// Every node, in id order
    pub fn nodes(&self) -> &[Arc<GridNode>] {
        &self.nodes
    }

    /// Nodes still running
    pub fn live_nodes(&self) -> Vec<Arc<GridNode>> {
        self.nodes.iter().filter(|n| n.is_running()).cloned().collect()
    }

    /// Cache handle served by node `id`
    pub fn cache(&self, id: u32) -> Result<Cache> {
        let node = self.node(id)?;
        if !node.is_running() {
            return Err(Error::NodeUnavailable(node.id()));
        }
        Ok(Cache::new(self.name.clone(), node))
    }

    /// Fault-injecting transport
    pub fn transport(&self) -> &InMemoryTransport {
        &self.transport
    }

    /// Membership view
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Crash node `id` and let the survivors react
    pub fn crash_node(&self, id: u32) -> Result<()> {
        let node = self.node(id)?;
        let dead = node.id();
        node.stop();
        self.transport.mark_down(dead);
        if !self.membership.mark_dead(dead) {
            return Ok(());
        }
        self.sequencer.forget(dead);
        tracing::warn!(cluster = %self.id, node = %dead, "node crashed");

        for survivor in self.live_nodes() {
            survivor.on_node_failure(dead);
        }
        Ok(())
    }

    /// Recovery over the live nodes
    pub fn recovery(&self) -> RecoveryCoordinator {
        RecoveryCoordinator::new(self.nodes.clone())
    }

    /// Transactions live on any running node, sorted
    pub fn active_transactions(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self
            .live_nodes()
            .iter()
            .flat_map(|n| n.transactions().ids())
            .collect();
        ids.sort();
        ids
    }

    /// Whether nothing is in flight on any running node
    pub fn is_quiescent(&self) -> bool {
        self.live_nodes().iter().all(|n| n.is_quiescent())
    }

    /// Stop every node
    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.stop();
        }
        tracing::info!(cluster = %self.id, "cluster stopped");
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("live", &self.membership.live_members().len())
            .finish()
    }
}
