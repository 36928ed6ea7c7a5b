//! Error types for the grid core
//!
//! One enum for every layer below the public facade. The variants follow the
//! transaction error taxonomy:
//!
//! | Variant | Meaning | Caller action |
//! |---------|---------|---------------|
//! | WriteSkewDetected | optimistic validation conflict, rolled back | retry |
//! | RolledBack | other negative vote, rolled back | retry |
//! | PrepareTimeout | participant did not vote in time, rolled back | retry |
//! | AlreadyActive / NoActiveTransaction | lifecycle misuse | fix caller |
//! | InDoubt | commit partially delivered, owned by recovery | operator |
//! | UnknownTransaction | no such (undecided) transaction | none |

use crate::types::{Key, NodeId, TxnId};
use thiserror::Error;

/// Grid error
#[derive(Debug, Error)]
pub enum Error {
    /// A key read by the transaction changed before it could commit
    #[error("write skew detected on key '{key}' in {txn_id}: read version {expected:?}, current {actual:?}")]
    WriteSkewDetected {
        /// Transaction that was rolled back
        txn_id: TxnId,
        /// Conflicting key
        key: Key,
        /// Version observed at read time
        expected: Option<u64>,
        /// Version found at validation time
        actual: Option<u64>,
    },

    /// The transaction was rolled back for a reason other than write skew
    #[error("transaction {txn_id} rolled back: {reason}")]
    RolledBack {
        /// Transaction that was rolled back
        txn_id: TxnId,
        /// Why the participants refused it
        reason: String,
    },

    /// A transaction is already bound to this call scope
    #[error("transaction {0} is already active")]
    AlreadyActive(TxnId),

    /// No transaction is bound to this call scope
    #[error("no active transaction")]
    NoActiveTransaction,

    /// A participant did not vote before the prepare timeout
    #[error("prepare of {txn_id} timed out waiting for {pending:?}")]
    PrepareTimeout {
        /// Transaction that was rolled back
        txn_id: TxnId,
        /// Participants that never voted
        pending: Vec<NodeId>,
    },

    /// The commit decision reached only part of the participants
    #[error("transaction {txn_id} is in doubt: {reason}")]
    InDoubt {
        /// Transaction handed to recovery
        txn_id: TxnId,
        /// What failed during the commit phase
        reason: String,
    },

    /// The transaction does not exist or is already resolved
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxnId),

    /// The destination node is down or unreachable
    #[error("node {0} is unavailable")]
    NodeUnavailable(NodeId),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Operation not permitted by configuration
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// Wire encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Bug or broken invariant
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for grid operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the transaction was rolled back as a consequence
    ///
    /// These are the commit failures that leave no trace in the grid.
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            Error::WriteSkewDetected { .. } | Error::RolledBack { .. } | Error::PrepareTimeout { .. }
        )
    }

    /// Whether retrying the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        self.is_rollback()
    }

    /// Whether the error hands the transaction to recovery
    pub fn is_in_doubt(&self) -> bool {
        matches!(self, Error::InDoubt { .. })
    }

    /// Transaction the error refers to, if any
    pub fn txn_id(&self) -> Option<TxnId> {
        match self {
            Error::WriteSkewDetected { txn_id, .. }
            | Error::RolledBack { txn_id, .. }
            | Error::PrepareTimeout { txn_id, .. }
            | Error::InDoubt { txn_id, .. } => Some(*txn_id),
            Error::AlreadyActive(txn_id) | Error::UnknownTransaction(txn_id) => Some(*txn_id),
            _ => None,
        }
    }
}
