//! Cache facade
//!
//! A [`Cache`] is one node's view of a named grid cache. Every operation
//! takes the caller's [`Session`]:
//! - with a transaction bound (external or batch-owned), writes are buffered
//!   in that transaction and reads go through its read set
//! - with none bound, a write runs in an implicit transaction that commits
//!   before the call returns, and a read sees the latest committed value

use crate::node::GridNode;
use crate::tm::{EmbeddedTransactionManager, Session, TransactionManager};
use crate::txn_table::TransactionHandle;
use gridstore_core::{Error, Key, Result, TransactionOrigin, TransactionStatus, TxnId, Value};
use std::sync::Arc;

/// One node's handle on a grid cache
#[derive(Clone)]
pub struct Cache {
    name: String,
    node: Arc<GridNode>,
    tm: Arc<dyn TransactionManager>,
}

impl Cache {
    /// Cache `name` served by `node`
    pub fn new(name: impl Into<String>, node: Arc<GridNode>) -> Self {
        let tm: Arc<dyn TransactionManager> =
            Arc::new(EmbeddedTransactionManager::new(Arc::clone(&node)));
        Self {
            name: name.into(),
            node,
            tm,
        }
    }

    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node serving this handle
    pub fn node(&self) -> &GridNode {
        &self.node
    }

    /// Transaction manager bound to this node
    pub fn transaction_manager(&self) -> &dyn TransactionManager {
        self.tm.as_ref()
    }

    /// A fresh call scope for this cache
    pub fn session(&self) -> Session {
        Session::new(self.node.id())
    }

    pub(crate) fn check_session(&self, session: &Session) -> Result<()> {
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

    fn bound(&self, session: &Session) -> Result<Option<TransactionHandle>> {
        self.check_session(session)?;
        session
            .current()
            .map(|txn| self.node.transactions().get(txn))
            .transpose()
    }

    /// Read `key`
    pub fn get(&self, session: &Session, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        let Some(handle) = self.bound(session)? else {
            return Ok(self.node.read(&key)?.value);
        };

        let mut ctx = handle.lock();
        ctx.ensure_active()?;
        if let Some(local) = ctx.lookup(&key) {
            return Ok(local);
        }
        let result = self.node.read(&key)?;
        ctx.record_read(&key, &result);
        Ok(result.value)
    }

    /// Current committed version of `key`, recorded like a read
    pub fn version_of(&self, session: &Session, key: impl Into<Key>) -> Result<Option<u64>> {
        let key = key.into();
        let Some(handle) = self.bound(session)? else {
            return Ok(self.node.read(&key)?.version);
        };

        let mut ctx = handle.lock();
        ctx.ensure_active()?;
        if let Some(version) = ctx.read_version(&key) {
            return Ok(version);
        }
        let result = self.node.read(&key)?;
        ctx.record_read(&key, &result);
        Ok(result.version)
    }

    /// Write `value` under `key`
    pub fn put(&self, session: &Session, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        match self.bound(session)? {
            Some(handle) => handle.lock().put(key, value),
            None => self.auto_commit(|txn| self.node.transactions().get(txn)?.lock().put(key, value)),
        }
    }

    /// Remove `key`
    pub fn remove(&self, session: &Session, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        match self.bound(session)? {
            Some(handle) => handle.lock().remove(key),
            None => self.auto_commit(|txn| self.node.transactions().get(txn)?.lock().remove(key)),
        }
    }

    /// Status of the transaction bound to `session`
    pub fn transaction_status(&self, session: &Session) -> Option<TransactionStatus> {
        session.current().and_then(|txn| self.node.status(txn))
    }

    fn auto_commit(&self, op: impl FnOnce(TxnId) -> Result<()>) -> Result<()> {
        let txn_id = self.node.begin(TransactionOrigin::Implicit)?;
        if let Err(e) = op(txn_id) {
            if let Err(rollback) = self.node.rollback(txn_id) {
                tracing::warn!(txn_id = %txn_id, error = %rollback, "implicit rollback failed");
            }
            return Err(e);
        }
        self.node.commit(txn_id)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("node", &self.node.id())
            .finish()
    }
}
