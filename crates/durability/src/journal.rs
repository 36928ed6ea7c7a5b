//! Recovery journal entry types
//!
//! Every change to the ledger is first described as a [`RecoveryEntry`]:
//! - Prepared: a recoverable transaction entered PREPARING
//! - Voted: a participant answered prepare
//! - Decided: the outcome became known
//! - Acknowledged: a participant applied the outcome
//! - MarkedInDoubt: the coordinator was lost before the outcome was seen
//! - Purged: the record is no longer needed
//!
//! Folding the entries of a journal in order rebuilds the records.

use crate::record::{Decision, ParticipantVote};
use gridstore_core::{NodeId, Timestamp, TxnId};
use serde::{Deserialize, Serialize};

/// Journal entry types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryEntry {
    /// Record created before votes are collected
    Prepared {
        /// Transaction
        txn_id: TxnId,
        /// Node driving the commit
        coordinator: NodeId,
        /// Owners of the written keys
        participants: Vec<NodeId>,
        /// Creation time (milliseconds since epoch)
        timestamp: Timestamp,
    },

    /// A participant's vote
    Voted {
        /// Transaction
        txn_id: TxnId,
        /// Voting participant
        node: NodeId,
        /// Vote
        vote: ParticipantVote,
    },

    /// Outcome known
    Decided {
        /// Transaction
        txn_id: TxnId,
        /// Outcome
        decision: Decision,
    },

    /// A participant applied the outcome
    Acknowledged {
        /// Transaction
        txn_id: TxnId,
        /// Acknowledging participant
        node: NodeId,
    },

    /// The outcome can no longer come from the coordinator
    MarkedInDoubt {
        /// Transaction
        txn_id: TxnId,
    },

    /// Record removed
    Purged {
        /// Transaction
        txn_id: TxnId,
    },
}

impl RecoveryEntry {
    /// Transaction the entry belongs to
    pub fn txn_id(&self) -> TxnId {
        match self {
            RecoveryEntry::Prepared { txn_id, .. }
            | RecoveryEntry::Voted { txn_id, .. }
            | RecoveryEntry::Decided { txn_id, .. }
            | RecoveryEntry::Acknowledged { txn_id, .. }
            | RecoveryEntry::MarkedInDoubt { txn_id }
            | RecoveryEntry::Purged { txn_id } => *txn_id,
        }
    }

    /// Node the entry is about, for per-participant entries
    pub fn node(&self) -> Option<NodeId> {
        match self {
            RecoveryEntry::Voted { node, .. } | RecoveryEntry::Acknowledged { node, .. } => {
                Some(*node)
            }
            _ => None,
        }
    }

    /// Whether the entry ends the record's life
    pub fn is_purge(&self) -> bool {
        matches!(self, RecoveryEntry::Purged { .. })
    }
}
