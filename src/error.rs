//! Unified error types for gridstore.
//!
//! This module provides a clean error type that wraps internal errors
//! and presents a consistent interface to users.

use gridstore_core::{Key, NodeId, TxnId};
use thiserror::Error;

/// All gridstore errors.
///
/// This is the canonical error type of the public API. Commit failures that
/// rolled the transaction back are distinct from in-doubt outcomes, which
/// only an operator can settle.
#[derive(Debug, Error)]
pub enum Error {
    /// A key read by the transaction changed before commit; rolled back
    #[error("write skew on '{key}' in {txn_id}")]
    WriteSkew {
        /// Rolled-back transaction
        txn_id: TxnId,
        /// Conflicting key
        key: Key,
    },

    /// A participant refused or could not be reached; rolled back
    #[error("transaction {txn_id} rolled back: {reason}")]
    RolledBack {
        /// Rolled-back transaction
        txn_id: TxnId,
        /// Why
        reason: String,
    },

    /// A participant did not vote in time; rolled back
    #[error("transaction {txn_id} timed out waiting for {pending:?}")]
    Timeout {
        /// Rolled-back transaction
        txn_id: TxnId,
        /// Participants that never voted
        pending: Vec<NodeId>,
    },

    /// The decision reached only part of the participants
    #[error("transaction {txn_id} is in doubt: {reason}")]
    InDoubt {
        /// Transaction awaiting recovery
        txn_id: TxnId,
        /// What failed
        reason: String,
    },

    /// Lifecycle misuse (nested begin, commit with nothing bound)
    #[error("transaction misuse: {0}")]
    Lifecycle(String),

    /// No such transaction, or already resolved
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxnId),

    /// A node is down or unreachable
    #[error("node {0} is unavailable")]
    Unavailable(NodeId),

    /// Invalid input or operation not allowed in the current state
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for gridstore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Rolled-back commits left nothing behind and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WriteSkew { .. } | Error::RolledBack { .. } | Error::Timeout { .. }
        )
    }

    /// Check if this is a write-skew conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::WriteSkew { .. })
    }

    /// Check if the transaction now belongs to recovery.
    pub fn is_in_doubt(&self) -> bool {
        matches!(self, Error::InDoubt { .. })
    }

    /// Check if this is a serious/unrecoverable error.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::InDoubt { .. })
    }

    /// Transaction the error refers to, if any.
    pub fn txn_id(&self) -> Option<TxnId> {
        match self {
            Error::WriteSkew { txn_id, .. }
            | Error::RolledBack { txn_id, .. }
            | Error::Timeout { txn_id, .. }
            | Error::InDoubt { txn_id, .. }
            | Error::UnknownTransaction(txn_id) => Some(*txn_id),
            _ => None,
        }
    }
}

// Convert from internal core errors
impl From<gridstore_core::Error> for Error {
    fn from(e: gridstore_core::Error) -> Self {
        use gridstore_core::Error as CoreError;
        match e {
            CoreError::WriteSkewDetected { txn_id, key, .. } => Error::WriteSkew { txn_id, key },
            CoreError::RolledBack { txn_id, reason } => Error::RolledBack { txn_id, reason },
            CoreError::PrepareTimeout { txn_id, pending } => Error::Timeout { txn_id, pending },
            CoreError::InDoubt { txn_id, reason } => Error::InDoubt { txn_id, reason },
            CoreError::AlreadyActive(txn_id) => {
                Error::Lifecycle(format!("transaction {} is already active", txn_id))
            }
            CoreError::NoActiveTransaction => Error::Lifecycle("no active transaction".into()),
            CoreError::UnknownTransaction(txn_id) => Error::UnknownTransaction(txn_id),
            CoreError::NodeUnavailable(node) => Error::Unavailable(node),
            CoreError::InvalidState(msg) | CoreError::InvalidOperation(msg) => {
                Error::ConstraintViolation(msg)
            }
            CoreError::Config(msg) => Error::Config(msg),
            CoreError::Serialization(msg) => Error::Serialization(msg),
            CoreError::Internal(msg) => Error::Internal(msg),
        }
    }
}
