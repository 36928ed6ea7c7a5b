//! Vote collection on the coordinator
//!
//! Two-phase prepares answer synchronously, total-order prepares answer with
//! a later [`VoteMessage`]. Both paths feed a [`VoteCollector`] opened
//! before the first prepare is sent, so a vote can never arrive before its
//! collector exists.

use crate::messages::{VoteMessage, VoteOutcome};
use dashmap::DashMap;
use gridstore_concurrency::ConflictType;
use gridstore_core::{NodeId, TxnId};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Result of waiting for votes
#[derive(Debug, Clone, PartialEq)]
pub enum VoteTally {
    /// Every participant voted yes
    AllPrepared,
    /// A participant voted no
    Rejected {
        /// First participant that refused
        node: NodeId,
        /// Why
        conflict: ConflictType,
    },
    /// A participant could not be reached
    Unreachable(NodeId),
    /// The deadline passed with votes missing
    Missing(Vec<NodeId>),
}

/// Votes of one transaction
#[derive(Debug)]
pub struct VoteCollector {
    expected: BTreeSet<NodeId>,
    votes: Mutex<BTreeMap<NodeId, VoteOutcome>>,
    arrived: Condvar,
}

impl VoteCollector {
    /// Expect one vote from each of `participants`
    pub fn new(participants: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            expected: participants.into_iter().collect(),
            votes: Mutex::new(BTreeMap::new()),
            arrived: Condvar::new(),
        }
    }

    /// Record a vote; the first vote of each participant counts
    pub fn record(&self, node: NodeId, outcome: VoteOutcome) -> bool {
        if !self.expected.contains(&node) {
            return false;
        }
        let mut votes = self.votes.lock();
        if votes.contains_key(&node) {
            return false;
        }
        votes.insert(node, outcome);
        drop(votes);
        self.arrived.notify_all();
        true
    }

    /// Whether `node` is expected to vote
    pub fn expects(&self, node: NodeId) -> bool {
        self.expected.contains(&node)
    }

    /// Votes received so far
    pub fn votes(&self) -> BTreeMap<NodeId, VoteOutcome> {
        self.votes.lock().clone()
    }

    /// Block until the outcome is known or `deadline` passes
    ///
    /// A negative vote decides immediately.
    pub fn wait_until(&self, deadline: Instant) -> VoteTally {
        let mut votes = self.votes.lock();
        loop {
            if let Some(tally) = self.decide(&votes) {
                return tally;
            }
            if self.arrived.wait_until(&mut votes, deadline).timed_out() {
                return self.decide(&votes).unwrap_or_else(|| {
                    VoteTally::Missing(
                        self.expected
                            .iter()
                            .filter(|n| !votes.contains_key(n))
                            .copied()
                            .collect(),
                    )
                });
            }
        }
    }

    fn decide(&self, votes: &BTreeMap<NodeId, VoteOutcome>) -> Option<VoteTally> {
        for (node, outcome) in votes {
            match outcome {
                VoteOutcome::Rejected(conflict) => {
                    return Some(VoteTally::Rejected {
                        node: *node,
                        conflict: conflict.clone(),
                    })
                }
                VoteOutcome::Unreachable => return Some(VoteTally::Unreachable(*node)),
                VoteOutcome::Prepared => {}
            }
        }
        (votes.len() == self.expected.len()).then_some(VoteTally::AllPrepared)
    }
}

/// Open collectors of one coordinator
#[derive(Debug, Default)]
pub struct VoteRegistry {
    collectors: DashMap<TxnId, Arc<VoteCollector>>,
}

impl VoteRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the collector of `txn`
    pub fn open(&self, txn: TxnId, participants: impl IntoIterator<Item = NodeId>) -> Arc<VoteCollector> {
        let collector = Arc::new(VoteCollector::new(participants));
        self.collectors.insert(txn, Arc::clone(&collector));
        collector
    }

    /// Route an inbound vote; false if nobody is waiting for it
    pub fn deliver(&self, vote: VoteMessage) -> bool {
        let collector = self.collectors.get(&vote.txn_id).map(|c| Arc::clone(c.value()));
        match collector {
            Some(collector) => collector.record(vote.node, vote.outcome),
            None => {
                tracing::debug!(txn_id = %vote.txn_id, node = %vote.node, "late vote ignored");
                false
            }
        }
    }

    /// Close the collector of `txn`
    pub fn close(&self, txn: TxnId) {
        self.collectors.remove(&txn);
    }

    /// Count `node` as unreachable in every open collector expecting it
    pub fn fail_node(&self, node: NodeId) -> usize {
        let waiting: Vec<Arc<VoteCollector>> = self
            .collectors
            .iter()
            .filter(|entry| entry.value().expects(node))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        waiting
            .into_iter()
            .filter(|collector| collector.record(node, VoteOutcome::Unreachable))
            .count()
    }

    /// Number of open collectors
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    /// Whether no collector is open
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
