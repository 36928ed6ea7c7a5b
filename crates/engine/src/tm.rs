//! Transaction-manager boundary
//!
//! A [`Session`] is the explicit call scope: every cache operation takes one,
//! and whatever transaction is bound to it is the transaction the operation
//! joins. [`TransactionManager`] is the external surface that binds and
//! unbinds transactions; [`EmbeddedTransactionManager`] is the in-process
//! implementation.

use crate::batch::BatchState;
use crate::node::GridNode;
use gridstore_core::{
    Error, NodeId, Result, TransactionOrigin, TransactionStatus, TxnId,
};
use std::sync::Arc;

/// Call scope carrying the bound transaction
#[derive(Debug)]
pub struct Session {
    pub(crate) node: NodeId,
    pub(crate) external: Option<TxnId>,
    pub(crate) batch: Option<BatchState>,
}

impl Session {
    /// An empty scope for operations on `node`
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            external: None,
            batch: None,
        }
    }

    /// Node whose caches this session talks to
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Transaction bound through the transaction manager
    pub fn external(&self) -> Option<TxnId> {
        self.external
    }

    /// Transaction that operations currently join
    pub fn current(&self) -> Option<TxnId> {
        self.external.or(match self.batch {
            Some(BatchState::Owned(txn)) => Some(txn),
            _ => None,
        })
    }

    /// Whether a batch is open
    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }
}

/// A transaction detached from its session by `suspend`
#[derive(Debug, PartialEq, Eq)]
pub struct SuspendedTransaction {
    txn_id: TxnId,
}

impl SuspendedTransaction {
    /// The detached transaction
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }
}

/// External transaction lifecycle
pub trait TransactionManager: Send + Sync {
    /// Start a transaction and bind it to `session`
    fn begin(&self, session: &mut Session) -> Result<TxnId>;

    /// Commit the bound transaction
    fn commit(&self, session: &mut Session) -> Result<()>;

    /// Roll back the bound transaction
    fn rollback(&self, session: &mut Session) -> Result<()>;

    /// Detach the bound transaction, keeping its state
    fn suspend(&self, session: &mut Session) -> Result<SuspendedTransaction>;

    /// Re-attach a suspended transaction
    fn resume(&self, session: &mut Session, suspended: SuspendedTransaction) -> Result<()>;

    /// Transaction bound to `session`
    fn get_transaction(&self, session: &Session) -> Option<TxnId>;

    /// Status of a live transaction
    fn status(&self, txn_id: TxnId) -> Option<TransactionStatus>;
}

/// Transaction manager backed by a grid node
#[derive(Debug, Clone)]
pub struct EmbeddedTransactionManager {
    node: Arc<GridNode>,
}

impl EmbeddedTransactionManager {
    /// Manage transactions coordinated by `node`
    pub fn new(node: Arc<GridNode>) -> Self {
        Self { node }
    }

    fn check_session(&self, session: &Session) -> Result<()> {
        if session.node == self.node.id() {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "session of {} used on {}",
                session.node,
                self.node.id()
            )))
        }
    }

    fn bound(&self, session: &Session) -> Option<TxnId> {
        session.external.or(match session.batch {
            Some(BatchState::Owned(txn)) => Some(txn),
            _ => None,
        })
    }
}

impl TransactionManager for EmbeddedTransactionManager {
    fn begin(&self, session: &mut Session) -> Result<TxnId> {
        self.check_session(session)?;
        if let Some(active) = self.bound(session) {
            return Err(Error::AlreadyActive(active));
        }
        let txn_id = self.node.begin(TransactionOrigin::External)?;
        session.external = Some(txn_id);
        Ok(txn_id)
    }

    fn commit(&self, session: &mut Session) -> Result<()> {
        self.check_session(session)?;
        let txn_id = session.external.take().ok_or(Error::NoActiveTransaction)?;
        self.node.commit(txn_id)
    }

    fn rollback(&self, session: &mut Session) -> Result<()> {
        self.check_session(session)?;
        let txn_id = session.external.take().ok_or(Error::NoActiveTransaction)?;
        self.node.rollback(txn_id)
    }

    fn suspend(&self, session: &mut Session) -> Result<SuspendedTransaction> {
        self.check_session(session)?;
        let txn_id = session.external.take().ok_or(Error::NoActiveTransaction)?;
        tracing::debug!(txn_id = %txn_id, "transaction suspended");
        Ok(SuspendedTransaction { txn_id })
    }

    fn resume(&self, session: &mut Session, suspended: SuspendedTransaction) -> Result<()> {
        self.check_session(session)?;
        if let Some(active) = self.bound(session) {
            return Err(Error::AlreadyActive(active));
        }
        if !self.node.transactions().contains(suspended.txn_id) {
            return Err(Error::UnknownTransaction(suspended.txn_id));
        }
        session.external = Some(suspended.txn_id);
        tracing::debug!(txn_id = %suspended.txn_id, "transaction resumed");
        Ok(())
    }

    fn get_transaction(&self, session: &Session) -> Option<TxnId> {
        session.external
    }

    fn status(&self, txn_id: TxnId) -> Option<TransactionStatus> {
        self.node.status(txn_id)
    }
}
