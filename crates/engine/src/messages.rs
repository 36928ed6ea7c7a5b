//! Cluster wire messages
//!
//! Every message a node sends to another node. Messages derive serde and
//! travel as MessagePack; the in-memory transport encodes and decodes each
//! hop so nothing crosses nodes by reference.
//!
//! The write set travels inside the prepare (two-phase) or the ordered
//! prepare (total order). Commit and rollback only name the transaction.

use gridstore_concurrency::{ConflictType, OrderedCommand};
use gridstore_core::{Error, Key, NodeId, ReadResult, Result, TxnId, WriteOp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a participant needs to prepare its part of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareRequest {
    /// Transaction
    pub txn_id: TxnId,
    /// Node collecting votes
    pub coordinator: NodeId,
    /// Every participant of the transaction
    pub participants: Vec<NodeId>,
    /// Read versions to validate, for keys this participant owns
    pub reads: Vec<(Key, Option<u64>)>,
    /// Writes this participant applies, in key order
    pub writes: Vec<(Key, WriteOp)>,
    /// Whether to validate `reads`
    pub validate: bool,
}

impl PrepareRequest {
    /// Whether another participant may apply the outcome without this one
    pub fn is_distributed(&self) -> bool {
        self.participants.len() > 1
    }
}

impl OrderedCommand for PrepareRequest {
    fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    fn keys(&self) -> Vec<Key> {
        self.writes.iter().map(|(key, _)| key.clone()).collect()
    }
}

/// A participant's answer to prepare
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VoteOutcome {
    /// Validated; writes parked until the decision
    Prepared,
    /// Refused
    Rejected(ConflictType),
    /// The participant could not be reached or left the cluster
    Unreachable,
}

impl VoteOutcome {
    /// Whether this is a yes vote
    pub fn is_prepared(&self) -> bool {
        matches!(self, VoteOutcome::Prepared)
    }
}

/// Vote sent back to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteMessage {
    /// Transaction
    pub txn_id: TxnId,
    /// Voting participant
    pub node: NodeId,
    /// Vote
    pub outcome: VoteOutcome,
}

/// Commit decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitMessage {
    /// Transaction
    pub txn_id: TxnId,
    /// Ordered slot at the receiving node (total order)
    pub seq: Option<u64>,
}

/// Rollback decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackMessage {
    /// Transaction
    pub txn_id: TxnId,
    /// Ordered slot at the receiving node (total order)
    pub seq: Option<u64>,
}

/// Drop near-cache copies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidateMessage {
    /// Keys whose copies are stale
    pub keys: Vec<Key>,
}

/// Everything that crosses between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterMessage {
    /// Two-phase prepare; answered with a [`ClusterMessage::Vote`]
    Prepare(PrepareRequest),
    /// Stamped total-order prepare; the vote follows asynchronously
    OrderedPrepare {
        /// Slot at the receiving node
        seq: u64,
        /// Earlier slots at the receiving node that will never arrive
        skipped: Vec<u64>,
        /// The prepare
        request: PrepareRequest,
    },
    /// Participant vote
    Vote(VoteMessage),
    /// Commit decision
    Commit(CommitMessage),
    /// Rollback decision
    Rollback(RollbackMessage),
    /// Near-cache invalidation
    Invalidate(InvalidateMessage),
    /// Remote read
    Get {
        /// Key to read
        key: Key,
        /// Reading node
        requestor: NodeId,
        /// Whether the requestor will keep a near-cache copy
        register_l1: bool,
    },
    /// Answer to [`ClusterMessage::Get`]
    Value(ReadResult),
    /// Plain acknowledgement
    Ack,
}

/// Message discriminant, used for logging and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`ClusterMessage::Prepare`]
    Prepare,
    /// [`ClusterMessage::OrderedPrepare`]
    OrderedPrepare,
    /// [`ClusterMessage::Vote`]
    Vote,
    /// [`ClusterMessage::Commit`]
    Commit,
    /// [`ClusterMessage::Rollback`]
    Rollback,
    /// [`ClusterMessage::Invalidate`]
    Invalidate,
    /// [`ClusterMessage::Get`]
    Get,
    /// [`ClusterMessage::Value`]
    Value,
    /// [`ClusterMessage::Ack`]
    Ack,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Prepare => "prepare",
            MessageKind::OrderedPrepare => "ordered_prepare",
            MessageKind::Vote => "vote",
            MessageKind::Commit => "commit",
            MessageKind::Rollback => "rollback",
            MessageKind::Invalidate => "invalidate",
            MessageKind::Get => "get",
            MessageKind::Value => "value",
            MessageKind::Ack => "ack",
        };
        f.write_str(name)
    }
}

impl ClusterMessage {
    /// Discriminant of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            ClusterMessage::Prepare(_) => MessageKind::Prepare,
            ClusterMessage::OrderedPrepare { .. } => MessageKind::OrderedPrepare,
            ClusterMessage::Vote(_) => MessageKind::Vote,
            ClusterMessage::Commit(_) => MessageKind::Commit,
            ClusterMessage::Rollback(_) => MessageKind::Rollback,
            ClusterMessage::Invalidate(_) => MessageKind::Invalidate,
            ClusterMessage::Get { .. } => MessageKind::Get,
            ClusterMessage::Value(_) => MessageKind::Value,
            ClusterMessage::Ack => MessageKind::Ack,
        }
    }

    /// Transaction the message belongs to
    pub fn txn_id(&self) -> Option<TxnId> {
        match self {
            ClusterMessage::Prepare(request) | ClusterMessage::OrderedPrepare { request, .. } => {
                Some(request.txn_id)
            }
            ClusterMessage::Vote(vote) => Some(vote.txn_id),
            ClusterMessage::Commit(commit) => Some(commit.txn_id),
            ClusterMessage::Rollback(rollback) => Some(rollback.txn_id),
            _ => None,
        }
    }

    /// Encode as MessagePack
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a message produced by [`ClusterMessage::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
