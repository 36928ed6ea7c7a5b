//! Grid configuration
//!
//! Configuration is grouped the same way operators think about it:
//! transaction protocol and timeouts, locking and isolation, versioning,
//! clustering. Every field has a default, so a TOML file only needs the
//! settings it changes:
//!
//! ```toml
//! invocation_batching = true
//!
//! [transaction]
//! protocol = "total_order"
//!
//! [locking]
//! isolation = "repeatable_read"
//! write_skew_check = true
//!
//! [versioning]
//! enabled = true
//! ```
//!
//! Builder-style `with_*` methods cover the common settings in code:
//!
//! ```
//! use gridstore_core::{GridConfig, TransactionProtocol};
//!
//! let config = GridConfig::default()
//!     .with_protocol(TransactionProtocol::TotalOrder)
//!     .with_write_skew_check(true)
//!     .with_invocation_batching(true);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How multi-owner commits are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionProtocol {
    /// Classic two-phase commit with per-key locks taken at prepare
    TwoPhase,
    /// Commits are stamped by the sequencer and applied in one global order
    TotalOrder,
}

impl Default for TransactionProtocol {
    fn default() -> Self {
        TransactionProtocol::TwoPhase
    }
}

/// Read isolation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Every read sees the latest committed value
    ReadCommitted,
    /// The first value read is pinned for the rest of the transaction
    RepeatableRead,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::RepeatableRead
    }
}

/// Entry versioning scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningScheme {
    /// Per-key counter incremented by one on every committed write
    Simple,
}

impl Default for VersioningScheme {
    fn default() -> Self {
        VersioningScheme::Simple
    }
}

/// Transaction protocol and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Commit protocol for multi-owner transactions
    pub protocol: TransactionProtocol,
    /// How long the coordinator waits for all votes
    pub prepare_timeout_ms: u64,
    /// How long a participant waits for a key lock during prepare
    pub lock_acquisition_timeout_ms: u64,
    /// Keep the coordinator's ledger of votes, decisions and acks
    ///
    /// Participants of a multi-participant transaction record it either way,
    /// so a lost decision always ends up in doubt.
    pub recovery_enabled: bool,
    /// Decisions each node remembers for duplicate commits and recovery lookups
    pub outcome_history: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            protocol: TransactionProtocol::default(),
            prepare_timeout_ms: 10_000,
            lock_acquisition_timeout_ms: 1_000,
            recovery_enabled: true,
            outcome_history: 4096,
        }
    }
}

/// Isolation and write-skew checking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockingConfig {
    /// Isolation level for transactional reads
    pub isolation: IsolationLevel,
    /// Validate read versions at prepare
    pub write_skew_check: bool,
}

/// Entry versioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Whether entries carry versions usable for validation
    pub enabled: bool,
    /// Versioning scheme
    pub scheme: VersioningScheme,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scheme: VersioningScheme::Simple,
        }
    }
}

/// Data distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Copies of every key
    pub num_owners: usize,
    /// Keep near-cache copies at non-owning readers
    pub l1_enabled: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            num_owners: 2,
            l1_enabled: true,
        }
    }
}

/// Complete configuration for one grid cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Transaction protocol and timeouts
    pub transaction: TransactionConfig,
    /// Isolation settings
    pub locking: LockingConfig,
    /// Versioning settings
    pub versioning: VersioningConfig,
    /// Distribution settings
    pub clustering: ClusteringConfig,
    /// Allow `start_batch` / `end_batch`
    pub invocation_batching: bool,
}

impl GridConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: GridConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check that the settings are consistent with each other
    pub fn validate(&self) -> Result<()> {
        if self.clustering.num_owners == 0 {
            return Err(Error::Config("num_owners must be at least 1".into()));
        }
        if self.locking.write_skew_check {
            if self.locking.isolation != IsolationLevel::RepeatableRead {
                return Err(Error::Config(
                    "write skew check requires repeatable_read isolation".into(),
                ));
            }
            if !self.versioning.enabled {
                return Err(Error::Config("write skew check requires versioning".into()));
            }
        }
        if self.transaction.prepare_timeout_ms == 0 {
            return Err(Error::Config("prepare_timeout_ms must be positive".into()));
        }
        if self.transaction.outcome_history == 0 {
            return Err(Error::Config("outcome_history must be at least 1".into()));
        }
        Ok(())
    }

    /// Whether prepare must validate read versions
    pub fn validates_reads(&self) -> bool {
        self.locking.write_skew_check
            && self.versioning.enabled
            && self.locking.isolation == IsolationLevel::RepeatableRead
    }

    /// Prepare timeout as a Duration
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction.prepare_timeout_ms)
    }

    /// Lock acquisition timeout as a Duration
    pub fn lock_acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction.lock_acquisition_timeout_ms)
    }

    /// Set the commit protocol
    pub fn with_protocol(mut self, protocol: TransactionProtocol) -> Self {
        self.transaction.protocol = protocol;
        self
    }

    /// Set the isolation level
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.locking.isolation = isolation;
        self
    }

    /// Enable or disable write-skew validation
    pub fn with_write_skew_check(mut self, enabled: bool) -> Self {
        self.locking.write_skew_check = enabled;
        self
    }

    /// Enable or disable invocation batching
    pub fn with_invocation_batching(mut self, enabled: bool) -> Self {
        self.invocation_batching = enabled;
        self
    }

    /// Enable or disable the coordinator-side recovery ledger
    pub fn with_recovery(mut self, enabled: bool) -> Self {
        self.transaction.recovery_enabled = enabled;
        self
    }

    /// Set how many applied decisions each node remembers
    pub fn with_outcome_history(mut self, outcomes: usize) -> Self {
        self.transaction.outcome_history = outcomes;
        self
    }

    /// Set the number of owners per key
    pub fn with_num_owners(mut self, num_owners: usize) -> Self {
        self.clustering.num_owners = num_owners;
        self
    }

    /// Enable or disable L1 near-caching
    pub fn with_l1(mut self, enabled: bool) -> Self {
        self.clustering.l1_enabled = enabled;
        self
    }

    /// Set the prepare timeout
    pub fn with_prepare_timeout(mut self, timeout: Duration) -> Self {
        self.transaction.prepare_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the lock acquisition timeout
    pub fn with_lock_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.transaction.lock_acquisition_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
