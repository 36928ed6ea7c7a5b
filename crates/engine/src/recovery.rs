//! Operator-facing recovery
//!
//! The [`RecoveryCoordinator`] looks at the recovery logs of the live nodes
//! and resolves transactions whose coordinator can no longer deliver the
//! decision. It never picks a decision on its own: a transaction completes
//! only through `force_commit` / `force_rollback`, or through
//! `resolve_from_participants` when a live participant already applied one.
//!
//! ## Resolution
//!
//! ```text
//! 1. find the live nodes holding an unresolved record for the transaction
//!    (none -> UnknownTransaction)
//! 2. refuse a decision contradicting one a node already recorded
//! 3. apply the decision on every live node (prepared state or not)
//! 4. each node records the decision and purges its record
//! ```

use crate::node::GridNode;
use gridstore_core::{Error, NodeId, Result, Timestamp, TxnId};
use gridstore_durability::{Decision, RecoveryRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Summary of one in-doubt transaction across the live nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InDoubtTransaction {
    /// Transaction id
    pub txn_id: TxnId,
    /// Node that coordinated it
    pub coordinator: NodeId,
    /// Every participant, sorted
    pub participants: Vec<NodeId>,
    /// Live nodes whose log flags it, sorted
    pub reported_by: Vec<NodeId>,
    /// Decision recorded by any reporter, `Unknown` if none
    pub decision: Decision,
    /// When the earliest reporter recorded the prepare
    pub prepared_at: Timestamp,
}

/// Recovery over a set of live nodes
#[derive(Debug, Clone)]
pub struct RecoveryCoordinator {
    nodes: Vec<Arc<GridNode>>,
}

impl RecoveryCoordinator {
    /// Recover using `nodes`; stopped nodes are ignored
    pub fn new(nodes: Vec<Arc<GridNode>>) -> Self {
        Self {
            nodes: nodes.into_iter().filter(|n| n.is_running()).collect(),
        }
    }

    /// Transactions whose decision cannot come from their coordinator
    pub fn list_in_doubt(&self) -> Vec<InDoubtTransaction> {
        let mut merged: BTreeMap<TxnId, InDoubtTransaction> = BTreeMap::new();
        for node in &self.nodes {
            for record in node.recovery_log().in_doubt() {
                let entry = merged
                    .entry(record.txn_id)
                    .or_insert_with(|| InDoubtTransaction {
                        txn_id: record.txn_id,
                        coordinator: record.coordinator,
                        participants: record.participants.iter().copied().collect(),
                        reported_by: Vec::new(),
                        decision: Decision::Unknown,
                        prepared_at: record.prepared_at,
                    });
                entry.reported_by.push(node.id());
                entry.prepared_at = entry.prepared_at.min(record.prepared_at);
                if record.decision != Decision::Unknown {
                    entry.decision = record.decision;
                }
            }
        }
        merged.into_values().collect()
    }

    /// Commit an unresolved transaction on every live node
    pub fn force_commit(&self, txn_id: TxnId) -> Result<()> {
        self.force(txn_id, Decision::Commit)
    }

    /// Roll back an unresolved transaction on every live node
    pub fn force_rollback(&self, txn_id: TxnId) -> Result<()> {
        self.force(txn_id, Decision::Abort)
    }

    /// Complete a transaction from what its live participants applied
    ///
    /// Returns the decision propagated, or `None` when no live node knows the
    /// outcome (the records stay untouched).
    pub fn resolve_from_participants(&self, txn_id: TxnId) -> Result<Option<Decision>> {
        let records = self.unresolved_records(txn_id)?;
        let learned = self
            .nodes
            .iter()
            .find_map(|node| node.outcome_of(txn_id).filter(|d| *d != Decision::Unknown))
            .or_else(|| {
                records
                    .values()
                    .map(|r| r.decision)
                    .find(|d| *d != Decision::Unknown)
            });

        match learned {
            Some(decision) => {
                tracing::info!(txn_id = %txn_id, %decision, "decision learned from participants");
                self.apply(txn_id, decision)?;
                Ok(Some(decision))
            }
            None => {
                tracing::info!(txn_id = %txn_id, "no live participant knows the outcome");
                Ok(None)
            }
        }
    }

    fn force(&self, txn_id: TxnId, decision: Decision) -> Result<()> {
        let records = self.unresolved_records(txn_id)?;
        if let Some((node, known)) = records
            .iter()
            .map(|(node, r)| (*node, r.decision))
            .find(|(_, d)| *d != Decision::Unknown && *d != decision)
        {
            return Err(Error::InvalidState(format!(
                "{} already recorded {} for {}",
                node, known, txn_id
            )));
        }
        tracing::warn!(txn_id = %txn_id, %decision, "forcing resolution");
        self.apply(txn_id, decision)
    }

    fn unresolved_records(&self, txn_id: TxnId) -> Result<BTreeMap<NodeId, RecoveryRecord>> {
        let records: BTreeMap<NodeId, RecoveryRecord> = self
            .nodes
            .iter()
            .filter_map(|node| node.recovery_log().get(txn_id).map(|r| (node.id(), r)))
            .filter(|(_, r)| r.is_unresolved())
            .collect();
        if records.is_empty() {
            Err(Error::UnknownTransaction(txn_id))
        } else {
            Ok(records)
        }
    }

    fn apply(&self, txn_id: TxnId, decision: Decision) -> Result<()> {
        let mut applied = BTreeSet::new();
        for node in &self.nodes {
            if node.resolve_locally(txn_id, decision)? {
                applied.insert(node.id());
            }
        }
        tracing::info!(txn_id = %txn_id, %decision, applied = ?applied, "transaction resolved");
        Ok(())
    }
}
