//! Process-wide manager registry
//!
//! A [`GridManager`] owns named caches, each backed by its own in-process
//! [`Cluster`]. Managers are registered globally under a uuid so that tests
//! and embedders can create and tear down independent grids in one process:
//!
//! ```text
//! create_manager(config, nodes) -> registered, running
//! get_cache(name, node)         -> cluster for `name` built on first use
//! kill_manager(id)              -> every cluster stopped, unregistered
//! ```

use crate::cache::Cache;
use crate::cluster::{Cluster, ClusterBuilder};
use gridstore_core::{Error, GridConfig, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

static MANAGERS: Lazy<RwLock<FxHashMap<Uuid, Arc<GridManager>>>> =
    Lazy::new(|| RwLock::new(FxHashMap::default()));

/// Create and register a manager whose caches run on `nodes` nodes
pub fn create_manager(default_config: GridConfig, nodes: u32) -> Result<Arc<GridManager>> {
    default_config.validate()?;
    if nodes == 0 {
        return Err(Error::Config("a manager needs at least one node".into()));
    }
    let manager = Arc::new(GridManager {
        id: Uuid::new_v4(),
        nodes,
        default_config,
        configs: RwLock::new(FxHashMap::default()),
        clusters: RwLock::new(FxHashMap::default()),
        running: AtomicBool::new(true),
    });
    MANAGERS.write().insert(manager.id, Arc::clone(&manager));
    tracing::info!(manager = %manager.id, nodes, "manager created");
    Ok(manager)
}

/// Stop and unregister manager `id`; returns whether it existed
pub fn kill_manager(id: Uuid) -> bool {
    let removed = MANAGERS.write().remove(&id);
    match removed {
        Some(manager) => {
            manager.stop();
            tracing::info!(manager = %id, "manager killed");
            true
        }
        None => false,
    }
}

/// Registered manager `id`
pub fn manager(id: Uuid) -> Option<Arc<GridManager>> {
    MANAGERS.read().get(&id).cloned()
}

/// Ids of every registered manager, sorted
pub fn managers() -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = MANAGERS.read().keys().copied().collect();
    ids.sort();
    ids
}

/// A set of named grid caches
pub struct GridManager {
    id: Uuid,
    nodes: u32,
    default_config: GridConfig,
    configs: RwLock<FxHashMap<String, GridConfig>>,
    clusters: RwLock<FxHashMap<String, Arc<Cluster>>>,
    running: AtomicBool,
}

impl GridManager {
    /// Registry id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the manager serves caches
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!("manager {} is stopped", self.id)))
        }
    }

    /// Configure cache `name` before its first use
    pub fn define_configuration(&self, name: &str, config: GridConfig) -> Result<()> {
        self.ensure_running()?;
        config.validate()?;
        if self.clusters.read().contains_key(name) {
            return Err(Error::InvalidState(format!("cache '{}' is already running", name)));
        }
        self.configs.write().insert(name.to_string(), config);
        Ok(())
    }

    /// Handle on cache `name` served by node `node`, starting the cache if needed
    pub fn get_cache(&self, name: &str, node: u32) -> Result<Cache> {
        self.cluster_for(name)?.cache(node)
    }

    /// Cluster backing cache `name`, if started
    pub fn cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.read().get(name).cloned()
    }

    /// Names of started caches, sorted
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn cluster_for(&self, name: &str) -> Result<Arc<Cluster>> {
        self.ensure_running()?;
        if let Some(cluster) = self.cluster(name) {
            return Ok(cluster);
        }

        let mut clusters = self.clusters.write();
        if let Some(cluster) = clusters.get(name) {
            return Ok(Arc::clone(cluster));
        }
        let config = self
            .configs
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        let cluster = Arc::new(
            ClusterBuilder::new()
                .name(name)
                .nodes(self.nodes)
                .config(config)
                .build()?,
        );
        tracing::debug!(manager = %self.id, cache = name, "cache started");
        clusters.insert(name.to_string(), Arc::clone(&cluster));
        Ok(cluster)
    }

    /// Stop every cache
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for cluster in self.clusters.write().drain().map(|(_, c)| c) {
            cluster.shutdown();
        }
    }
}

impl std::fmt::Debug for GridManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridManager")
            .field("id", &self.id)
            .field("nodes", &self.nodes)
            .field("caches", &self.cache_names())
            .field("running", &self.is_running())
            .finish()
    }
}
