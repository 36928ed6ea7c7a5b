//! Arena of live transactions
//!
//! Sessions, the batch adapter and the commit coordinator refer to a
//! transaction only by [`TxnId`]; the context itself lives here until it
//! reaches a terminal state.

use dashmap::DashMap;
use gridstore_concurrency::TransactionContext;
use gridstore_core::{Error, Result, TransactionStatus, TxnId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handle to one transaction's context
pub type TransactionHandle = Arc<Mutex<TransactionContext>>;

/// Live transactions of one node
#[derive(Debug, Default)]
pub struct TransactionTable {
    txns: DashMap<TxnId, TransactionHandle>,
}

impl TransactionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a context
    pub fn insert(&self, ctx: TransactionContext) -> TransactionHandle {
        let txn_id = ctx.txn_id;
        let handle = Arc::new(Mutex::new(ctx));
        self.txns.insert(txn_id, Arc::clone(&handle));
        handle
    }

    /// Handle of `txn`
    ///
    /// # Errors
    /// [`Error::UnknownTransaction`] if the transaction ended or never existed.
    pub fn get(&self, txn: TxnId) -> Result<TransactionHandle> {
        self.txns
            .get(&txn)
            .map(|h| Arc::clone(h.value()))
            .ok_or(Error::UnknownTransaction(txn))
    }

    /// Drop a context
    pub fn remove(&self, txn: TxnId) -> Option<TransactionHandle> {
        self.txns.remove(&txn).map(|(_, h)| h)
    }

    /// Status of `txn`, if still live
    pub fn status(&self, txn: TxnId) -> Option<TransactionStatus> {
        self.txns.get(&txn).map(|h| h.value().lock().status)
    }

    /// Whether `txn` is live
    pub fn contains(&self, txn: TxnId) -> bool {
        self.txns.contains_key(&txn)
    }

    /// Live transaction ids, sorted
    pub fn ids(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.txns.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Number of live transactions
    pub fn len(&self) -> usize {
        self.txns.len()
    }

    /// Whether no transaction is live
    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }
}
