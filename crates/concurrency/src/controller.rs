//! Local concurrency controller
//!
//! Runs the participant side of a commit on one node:
//!
//! ```text
//! prepare(txn)
//!   1. (two-phase) lock every written key owned here, all-or-nothing
//!   2. (write-skew check) compare read versions with live versions
//!   3. IF conflict: release locks, vote no
//!   4. park the write set as prepared, vote yes
//! commit(txn)
//!   5. apply the parked writes to the version store (versions + 1)
//!   6. release locks
//! rollback(txn)
//!   5'. drop the parked writes, release locks
//! ```
//!
//! Under total order no locks are taken: the delivery scheduler already keeps
//! any other transaction on the same keys from running between prepare and
//! commit.

use crate::locks::KeyLockTable;
use crate::validation::{validate_read_set, ConflictType};
use gridstore_core::{Error, Key, NodeId, Result, TxnId, WriteOp};
use gridstore_storage::{AppliedWrite, VersionStore};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a prepare obtains per-key exclusivity and whether it validates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareMode {
    /// Lock written keys (two-phase commit)
    pub acquire_locks: bool,
    /// Validate read versions (write-skew check)
    pub validate: bool,
}

impl PrepareMode {
    /// Two-phase prepare: lock, then optionally validate
    pub fn two_phase(validate: bool) -> Self {
        Self {
            acquire_locks: true,
            validate,
        }
    }

    /// Prepare inside the ordered stream: validate only
    pub fn ordered(validate: bool) -> Self {
        Self {
            acquire_locks: false,
            validate,
        }
    }
}

/// Write set parked between a yes vote and the decision
#[derive(Debug, Clone)]
struct PreparedTxn {
    coordinator: NodeId,
    writes: Vec<(Key, WriteOp)>,
    locked: Vec<Key>,
}

/// Participant-side prepare/commit/rollback for one node
///
/// # Thread Safety
///
/// The prepared table is guarded by a short-lived mutex that is never held
/// while waiting for a lock or touching the store. Two transactions only ever
/// contend on the keys they share.
pub struct LocalConcurrencyController {
    store: Arc<VersionStore>,
    locks: KeyLockTable,
    prepared: Mutex<FxHashMap<TxnId, PreparedTxn>>,
    lock_timeout: Duration,
}

impl LocalConcurrencyController {
    /// Create a controller over `store`
    ///
    /// # Arguments
    /// * `store` - The node's version store
    /// * `lock_timeout` - How long a two-phase prepare waits for key locks
    pub fn new(store: Arc<VersionStore>, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks: KeyLockTable::new(),
            prepared: Mutex::new(FxHashMap::default()),
            lock_timeout,
        }
    }

    /// The underlying version store
    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    /// Current version of `key`
    pub fn read_version(&self, key: &Key) -> Option<u64> {
        self.store.version_of(key)
    }

    /// Prepare `txn` on this node
    ///
    /// A repeated prepare of an already prepared transaction votes yes again
    /// without re-validating.
    ///
    /// # Errors
    /// The first conflict found; the node then holds nothing for `txn`.
    pub fn prepare(
        &self,
        txn: TxnId,
        coordinator: NodeId,
        reads: &[(Key, Option<u64>)],
        writes: Vec<(Key, WriteOp)>,
        mode: PrepareMode,
    ) -> std::result::Result<(), ConflictType> {
        if self.is_prepared(txn) {
            tracing::debug!(txn_id = %txn, "duplicate prepare");
            return Ok(());
        }

        let mut locked: Vec<Key> = Vec::new();
        if mode.acquire_locks {
            locked = writes.iter().map(|(key, _)| key.clone()).collect();
            locked.sort();
            locked.dedup();
            if let Err(conflict) = self.locks.acquire_all(txn, &locked, self.lock_timeout) {
                return Err(ConflictType::LockTimeout {
                    key: conflict.key,
                    holder: Some(conflict.holder),
                });
            }
        }

        if mode.validate {
            let result = validate_read_set(reads, &self.store);
            if let Some(conflict) = result.into_first() {
                self.locks.release_all(txn, &locked);
                tracing::debug!(txn_id = %txn, %conflict, "prepare validation failed");
                return Err(conflict);
            }
        }

        self.prepared.lock().insert(
            txn,
            PreparedTxn {
                coordinator,
                writes,
                locked,
            },
        );
        Ok(())
    }

    /// Apply the prepared writes of `txn`
    ///
    /// # Errors
    /// [`Error::UnknownTransaction`] if `txn` is not prepared here.
    pub fn commit(&self, txn: TxnId) -> Result<Vec<AppliedWrite>> {
        let prepared = self
            .prepared
            .lock()
            .remove(&txn)
            .ok_or(Error::UnknownTransaction(txn))?;

        let applied = self.store.apply_batch(&prepared.writes);
        self.locks.release_all(txn, &prepared.locked);
        tracing::debug!(txn_id = %txn, writes = applied.len(), "applied prepared writes");
        Ok(applied)
    }

    /// Discard the prepared writes of `txn`
    ///
    /// Returns whether anything was prepared.
    pub fn rollback(&self, txn: TxnId) -> bool {
        match self.prepared.lock().remove(&txn) {
            Some(prepared) => {
                self.locks.release_all(txn, &prepared.locked);
                true
            }
            None => false,
        }
    }

    /// Whether `txn` is prepared here
    pub fn is_prepared(&self, txn: TxnId) -> bool {
        self.prepared.lock().contains_key(&txn)
    }

    /// Prepared transactions coordinated by `coordinator`, sorted
    pub fn prepared_by(&self, coordinator: NodeId) -> Vec<TxnId> {
        let mut txns: Vec<TxnId> = self
            .prepared
            .lock()
            .iter()
            .filter(|(_, p)| p.coordinator == coordinator)
            .map(|(txn, _)| *txn)
            .collect();
        txns.sort();
        txns
    }

    /// Keys `txn` would write here
    pub fn prepared_keys(&self, txn: TxnId) -> Option<Vec<Key>> {
        self.prepared
            .lock()
            .get(&txn)
            .map(|p| p.writes.iter().map(|(key, _)| key.clone()).collect())
    }

    /// Number of prepared transactions
    pub fn prepared_count(&self) -> usize {
        self.prepared.lock().len()
    }

    /// Current holder of the lock on `key`
    pub fn lock_holder(&self, key: &Key) -> Option<TxnId> {
        self.locks.holder(key)
    }
}

impl std::fmt::Debug for LocalConcurrencyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConcurrencyController")
            .field("store", &self.store)
            .field("prepared", &self.prepared_count())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}
