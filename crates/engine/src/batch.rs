//! Invocation batching
//!
//! A batch groups cache calls into one transaction without the caller
//! touching the transaction manager. When a transaction is already bound to
//! the session the batch joins it and leaves its lifecycle to whoever began
//! it; otherwise the batch starts its own and `end_batch` decides its fate.
//!
//! ```text
//! start_batch   external bound?   yes -> Joined(txn)   end_batch: no-op
//!                                 no  -> Owned(txn)    end_batch: commit | rollback
//! ```

use crate::cache::Cache;
use crate::tm::Session;
use gridstore_core::{Error, Result, TransactionOrigin, TxnId};

/// How the open batch relates to its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// The batch began this transaction and ends it
    Owned(TxnId),
    /// The batch runs inside an externally begun transaction
    Joined(TxnId),
}

impl BatchState {
    /// Transaction the batch runs in
    pub fn txn_id(&self) -> TxnId {
        match self {
            BatchState::Owned(txn) | BatchState::Joined(txn) => *txn,
        }
    }
}

impl Cache {
    /// Open a batch on `session`
    ///
    /// Returns false when a batch is already open.
    ///
    /// # Errors
    /// With batching disabled: [`Error::AlreadyActive`] if an external
    /// transaction is bound, [`Error::InvalidOperation`] otherwise.
    pub fn start_batch(&self, session: &mut Session) -> Result<bool> {
        self.check_session(session)?;
        if !self.node().config().invocation_batching {
            return Err(match session.external {
                Some(active) => Error::AlreadyActive(active),
                None => Error::InvalidOperation("invocation batching is disabled".to_string()),
            });
        }
        if session.batch.is_some() {
            return Ok(false);
        }

        let state = match session.external {
            Some(external) => BatchState::Joined(external),
            None => BatchState::Owned(self.node().begin(TransactionOrigin::Batch)?),
        };
        tracing::debug!(txn_id = %state.txn_id(), ?state, "batch started");
        session.batch = Some(state);
        Ok(true)
    }

    /// Close the batch on `session`
    ///
    /// Commits or rolls back the transaction only if the batch began it.
    /// Without an open batch this does nothing.
    pub fn end_batch(&self, session: &mut Session, successful: bool) -> Result<()> {
        self.check_session(session)?;
        match session.batch.take() {
            Some(BatchState::Owned(txn_id)) => {
                tracing::debug!(txn_id = %txn_id, successful, "batch ended");
                if successful {
                    self.node().commit(txn_id)
                } else {
                    self.node().rollback(txn_id)
                }
            }
            Some(BatchState::Joined(txn_id)) => {
                tracing::debug!(txn_id = %txn_id, "batch left external transaction");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
