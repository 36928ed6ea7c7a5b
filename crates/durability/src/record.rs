//! Recovery records
//!
//! One record per recoverable transaction: a transaction that entered
//! PREPARING with more than one participant.

use gridstore_core::{NodeId, Timestamp, TxnId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A participant's answer to prepare, as far as the ledger knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantVote {
    /// Validated and holding its writes
    Prepared,
    /// Refused, or rolled back
    Aborted,
    /// No answer yet
    Unknown,
}

/// Outcome of a transaction, as far as the ledger knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// Writes are applied everywhere
    Commit,
    /// Nothing is applied anywhere
    Abort,
    /// Not decided, or the decision was lost with the coordinator
    Unknown,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Decision::Commit => "commit",
            Decision::Abort => "abort",
            Decision::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Ledger state of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Transaction
    pub txn_id: TxnId,
    /// Node driving the commit
    pub coordinator: NodeId,
    /// Owners of the written keys
    pub participants: BTreeSet<NodeId>,
    /// Vote of each participant
    pub votes: BTreeMap<NodeId, ParticipantVote>,
    /// Outcome
    pub decision: Decision,
    /// Participants that confirmed the outcome
    pub acks: BTreeSet<NodeId>,
    /// Set when the outcome can no longer be learned from the coordinator
    pub in_doubt: bool,
    /// When the record was created (milliseconds since epoch)
    pub prepared_at: Timestamp,
}

impl RecoveryRecord {
    /// New record with every vote unknown
    pub fn new(
        txn_id: TxnId,
        coordinator: NodeId,
        participants: impl IntoIterator<Item = NodeId>,
        prepared_at: Timestamp,
    ) -> Self {
        let participants: BTreeSet<NodeId> = participants.into_iter().collect();
        let votes = participants
            .iter()
            .map(|node| (*node, ParticipantVote::Unknown))
            .collect();
        Self {
            txn_id,
            coordinator,
            participants,
            votes,
            decision: Decision::Unknown,
            acks: BTreeSet::new(),
            in_doubt: false,
            prepared_at,
        }
    }

    /// Whether every participant voted yes
    pub fn all_prepared(&self) -> bool {
        self.votes.values().all(|v| *v == ParticipantVote::Prepared)
    }

    /// Whether no decision is known
    pub fn is_undecided(&self) -> bool {
        self.decision == Decision::Unknown
    }

    /// Whether an operator may still resolve the record
    pub fn is_unresolved(&self) -> bool {
        self.is_undecided() || self.in_doubt
    }

    /// Participants that have not confirmed the outcome
    pub fn pending_acks(&self) -> Vec<NodeId> {
        self.participants.difference(&self.acks).copied().collect()
    }

    /// Whether every participant confirmed a known outcome
    pub fn is_complete(&self) -> bool {
        !self.is_undecided() && self.acks.is_superset(&self.participants)
    }
}
