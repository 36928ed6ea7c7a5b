//! Per-transaction state
//!
//! A [`TransactionContext`] buffers everything a transaction does until
//! commit. Nothing in it is visible to other transactions:
//!
//! - the read set pins the version (and, under repeatable read, the value)
//!   of every key the transaction read
//! - the write set holds pending puts and removes, ordered by key
//!
//! The context never references the coordinator or the nodes; it is stored
//! in an arena keyed by [`TxnId`] and every other component refers to it by
//! id.

use gridstore_core::{
    Error, GridConfig, IsolationLevel, Key, NodeId, ReadResult, Result, TransactionOrigin,
    TransactionProtocol, TransactionStatus, TxnId, Value, WriteOp,
};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// What a transaction observed when it first read a key
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRecord {
    /// Version at read time, `None` if the key was never written
    pub version: Option<u64>,
    /// Value at read time
    pub value: Option<Value>,
}

/// Read/write set tracking for one transaction
#[derive(Debug)]
pub struct TransactionContext {
    /// Transaction id
    pub txn_id: TxnId,
    /// Current status
    pub status: TransactionStatus,
    /// Who owns the lifecycle
    pub origin: TransactionOrigin,
    /// Commit protocol chosen at creation
    pub protocol: TransactionProtocol,
    /// Node driving the commit
    pub coordinator: NodeId,
    /// Owners of written keys, filled in at prepare
    pub participants: BTreeSet<NodeId>,
    isolation: IsolationLevel,
    validate_reads: bool,
    read_set: FxHashMap<Key, ReadRecord>,
    write_set: BTreeMap<Key, WriteOp>,
    started_at: Instant,
}

impl TransactionContext {
    /// Create an active transaction coordinated by its originating node
    pub fn new(txn_id: TxnId, origin: TransactionOrigin, config: &GridConfig) -> Self {
        Self {
            txn_id,
            status: TransactionStatus::Active,
            origin,
            protocol: config.transaction.protocol,
            coordinator: txn_id.origin,
            participants: BTreeSet::new(),
            isolation: config.locking.isolation,
            validate_reads: config.validates_reads(),
            read_set: FxHashMap::default(),
            write_set: BTreeMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Fail unless the transaction still accepts operations
    pub fn ensure_active(&self) -> Result<()> {
        if self.status.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "transaction {} is {}",
                self.txn_id, self.status
            )))
        }
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "transaction {} cannot move from {} to {}",
                self.txn_id, self.status, next
            )));
        }
        tracing::trace!(txn_id = %self.txn_id, from = %self.status, to = %next, "transaction status change");
        self.status = next;
        Ok(())
    }

    /// Answer a read from the transaction's own state
    ///
    /// Returns `Some(value)` when the read can be served locally:
    /// the transaction wrote the key, or (repeatable read) already read it.
    /// `None` means the grid must be consulted.
    pub fn lookup(&self, key: &Key) -> Option<Option<Value>> {
        if let Some(op) = self.write_set.get(key) {
            return Some(op.visible_value().cloned());
        }
        if self.isolation == IsolationLevel::RepeatableRead {
            if let Some(read) = self.read_set.get(key) {
                return Some(read.value.clone());
            }
        }
        None
    }

    /// Remember what a grid read returned
    ///
    /// Only the first read of a key is recorded, so the pinned version is the
    /// one validation must compare against.
    pub fn record_read(&mut self, key: &Key, result: &ReadResult) {
        if self.isolation != IsolationLevel::RepeatableRead {
            return;
        }
        self.read_set.entry(key.clone()).or_insert_with(|| ReadRecord {
            version: result.version,
            value: result.value.clone(),
        });
    }

    /// Version observed for `key`, if it was read
    pub fn read_version(&self, key: &Key) -> Option<Option<u64>> {
        self.read_set.get(key).map(|r| r.version)
    }

    /// Buffer a put
    pub fn put(&mut self, key: Key, value: Value) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key, WriteOp::Put(value));
        Ok(())
    }

    /// Buffer a removal
    pub fn remove(&mut self, key: Key) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key, WriteOp::Remove);
        Ok(())
    }

    /// Pending writes, ordered by key
    pub fn write_set(&self) -> &BTreeMap<Key, WriteOp> {
        &self.write_set
    }

    /// Keys written, in canonical order
    pub fn written_keys(&self) -> Vec<Key> {
        self.write_set.keys().cloned().collect()
    }

    /// Number of keys read from the grid
    pub fn read_count(&self) -> usize {
        self.read_set.len()
    }

    /// Whether commit has nothing to send
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Whether prepare validates read versions
    pub fn validates_reads(&self) -> bool {
        self.validate_reads
    }

    /// Read versions a participant must validate
    ///
    /// Empty unless write-skew checking is on. `owned` selects the keys the
    /// participant holds a copy of. Sorted by key.
    pub fn reads_to_validate(&self, owned: impl Fn(&Key) -> bool) -> Vec<(Key, Option<u64>)> {
        if !self.validate_reads {
            return Vec::new();
        }
        let mut reads: Vec<(Key, Option<u64>)> = self
            .read_set
            .iter()
            .filter(|(key, _)| owned(key))
            .map(|(key, read)| (key.clone(), read.version))
            .collect();
        reads.sort_by(|(a, _), (b, _)| a.cmp(b));
        reads
    }

    /// Writes a participant must apply, in key order
    pub fn writes_for(&self, owned: impl Fn(&Key) -> bool) -> Vec<(Key, WriteOp)> {
        self.write_set
            .iter()
            .filter(|(key, _)| owned(key))
            .map(|(key, op)| (key.clone(), op.clone()))
            .collect()
    }

    /// Time since begin
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
