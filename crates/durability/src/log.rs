//! Recovery log
//!
//! ## Write path
//!
//! ```text
//! 1. build the RecoveryEntry describing the change
//! 2. append it to the journal
//! 3. fold it into the materialized records (same fold as replay)
//! ```
//!
//! Both steps happen under one write lock, so the records always equal the
//! fold of the journal. Readers (`get`, `in_doubt`, `undecided`) take the
//! read lock and never block each other.

use crate::encoding::{decode_journal, encode_journal};
use crate::journal::RecoveryEntry;
use crate::record::{Decision, ParticipantVote, RecoveryRecord};
use chrono::Utc;
use gridstore_core::{Error, NodeId, Result, TxnId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct LogState {
    journal: Vec<RecoveryEntry>,
    records: BTreeMap<TxnId, RecoveryRecord>,
}

impl LogState {
    fn append(&mut self, entry: RecoveryEntry) {
        fold(&mut self.records, &entry);
        self.journal.push(entry);
    }
}

fn fold(records: &mut BTreeMap<TxnId, RecoveryRecord>, entry: &RecoveryEntry) {
    match entry {
        RecoveryEntry::Prepared {
            txn_id,
            coordinator,
            participants,
            timestamp,
        } => {
            records.entry(*txn_id).or_insert_with(|| {
                RecoveryRecord::new(*txn_id, *coordinator, participants.iter().copied(), *timestamp)
            });
        }
        RecoveryEntry::Voted { txn_id, node, vote } => {
            if let Some(record) = records.get_mut(txn_id) {
                record.votes.insert(*node, *vote);
            }
        }
        RecoveryEntry::Decided { txn_id, decision } => {
            if let Some(record) = records.get_mut(txn_id) {
                record.decision = *decision;
            }
        }
        RecoveryEntry::Acknowledged { txn_id, node } => {
            if let Some(record) = records.get_mut(txn_id) {
                record.acks.insert(*node);
            }
        }
        RecoveryEntry::MarkedInDoubt { txn_id } => {
            if let Some(record) = records.get_mut(txn_id) {
                record.in_doubt = true;
            }
        }
        RecoveryEntry::Purged { txn_id } => {
            records.remove(txn_id);
        }
    }
}

/// Ledger of recoverable transactions on one node
///
/// # Thread Safety
///
/// All methods take `&self`; a single `parking_lot::RwLock` guards the
/// journal and the records together.
#[derive(Debug, Default)]
pub struct RecoveryLog {
    state: RwLock<LogState>,
}

impl RecoveryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log by folding `entries` in order
    pub fn replay(entries: impl IntoIterator<Item = RecoveryEntry>) -> Self {
        let mut state = LogState::default();
        for entry in entries {
            state.append(entry);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Rebuild a log from an encoded journal
    pub fn import(bytes: &[u8]) -> Result<Self> {
        Ok(Self::replay(decode_journal(bytes)?))
    }

    /// Encode the journal
    pub fn export(&self) -> Result<Vec<u8>> {
        encode_journal(&self.state.read().journal)
    }

    /// Create the record of a transaction entering PREPARING
    ///
    /// A second call for the same transaction is a no-op.
    pub fn record_prepared(&self, txn_id: TxnId, coordinator: NodeId, participants: &[NodeId]) {
        let mut state = self.state.write();
        if state.records.contains_key(&txn_id) {
            return;
        }
        tracing::debug!(txn_id = %txn_id, coordinator = %coordinator, participants = participants.len(), "recovery record created");
        state.append(RecoveryEntry::Prepared {
            txn_id,
            coordinator,
            participants: participants.to_vec(),
            timestamp: Utc::now().timestamp_millis(),
        });
    }

    /// Record a participant's vote
    pub fn record_vote(&self, txn_id: TxnId, node: NodeId, vote: ParticipantVote) -> Result<()> {
        let mut state = self.state.write();
        Self::require(&state, txn_id)?;
        state.append(RecoveryEntry::Voted { txn_id, node, vote });
        Ok(())
    }

    /// Record the outcome
    pub fn record_decision(&self, txn_id: TxnId, decision: Decision) -> Result<()> {
        let mut state = self.state.write();
        Self::require(&state, txn_id)?;
        state.append(RecoveryEntry::Decided { txn_id, decision });
        Ok(())
    }

    /// Record that `node` applied the outcome
    ///
    /// Purges the record once every participant has acknowledged a known
    /// outcome. Returns whether the record was purged.
    pub fn record_ack(&self, txn_id: TxnId, node: NodeId) -> Result<bool> {
        let mut state = self.state.write();
        Self::require(&state, txn_id)?;
        state.append(RecoveryEntry::Acknowledged { txn_id, node });

        let complete = state
            .records
            .get(&txn_id)
            .map(RecoveryRecord::is_complete)
            .unwrap_or(false);
        if complete {
            state.append(RecoveryEntry::Purged { txn_id });
            tracing::debug!(txn_id = %txn_id, "recovery record purged after final ack");
        }
        Ok(complete)
    }

    /// Flag a record whose outcome can no longer come from its coordinator
    pub fn mark_in_doubt(&self, txn_id: TxnId) -> Result<()> {
        let mut state = self.state.write();
        Self::require(&state, txn_id)?;
        state.append(RecoveryEntry::MarkedInDoubt { txn_id });
        tracing::warn!(txn_id = %txn_id, "transaction in doubt");
        Ok(())
    }

    /// Flag every undecided record coordinated by `coordinator`
    ///
    /// Returns the transactions newly marked, sorted.
    pub fn mark_in_doubt_for(&self, coordinator: NodeId) -> Vec<TxnId> {
        let mut state = self.state.write();
        let affected: Vec<TxnId> = state
            .records
            .values()
            .filter(|r| r.coordinator == coordinator && r.is_undecided() && !r.in_doubt)
            .map(|r| r.txn_id)
            .collect();
        for txn_id in &affected {
            state.append(RecoveryEntry::MarkedInDoubt { txn_id: *txn_id });
            tracing::warn!(txn_id = %txn_id, coordinator = %coordinator, "coordinator lost, transaction in doubt");
        }
        affected
    }

    /// Remove a record; returns whether it existed
    pub fn purge(&self, txn_id: TxnId) -> bool {
        let mut state = self.state.write();
        if !state.records.contains_key(&txn_id) {
            return false;
        }
        state.append(RecoveryEntry::Purged { txn_id });
        true
    }

    /// Snapshot of one record
    pub fn get(&self, txn_id: TxnId) -> Option<RecoveryRecord> {
        self.state.read().records.get(&txn_id).cloned()
    }

    /// Whether a record exists
    pub fn contains(&self, txn_id: TxnId) -> bool {
        self.state.read().records.contains_key(&txn_id)
    }

    /// Records flagged in doubt, by transaction id
    pub fn in_doubt(&self) -> Vec<RecoveryRecord> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| r.in_doubt)
            .cloned()
            .collect()
    }

    /// Records with no known outcome, by transaction id
    pub fn undecided(&self) -> Vec<RecoveryRecord> {
        self.state
            .read()
            .records
            .values()
            .filter(|r| r.is_undecided())
            .cloned()
            .collect()
    }

    /// Copy of the journal
    pub fn journal(&self) -> Vec<RecoveryEntry> {
        self.state.read().journal.clone()
    }

    /// Snapshot of every record
    pub fn records(&self) -> Vec<RecoveryRecord> {
        self.state.read().records.values().cloned().collect()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Whether no record is live
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    fn require(state: &LogState, txn_id: TxnId) -> Result<()> {
        if state.records.contains_key(&txn_id) {
            Ok(())
        } else {
            Err(Error::UnknownTransaction(txn_id))
        }
    }
}
