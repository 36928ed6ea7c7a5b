//! Commit coordinator
//!
//! Drives one transaction from ACTIVE to a terminal state.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. ACTIVE → PREPARING
//! 2. read-only? → PREPARED → COMMITTING → COMMITTED, nothing sent
//! 3. participants = live owners of every written key
//! 4. >1 participant and recovery on: create the coordinator's record
//!    (participants of such a transaction always keep their own)
//! 5. open the vote collector
//! 6. two-phase:   Prepare to each participant, vote in the response
//!    total order: stamp, OrderedPrepare to each participant, votes follow
//! 7. wait for all votes or the prepare timeout
//! 8. all yes: PREPARED, send Commit
//!      first Commit fails  → nothing applied anywhere, roll back
//!      later Commit fails  → IN_DOUBT, left to recovery
//!      all delivered       → COMMITTING → COMMITTED
//! 9. any no / unreachable / timeout: ROLLING_BACK, send Rollback, ROLLED_BACK
//! ```
//!
//! The context leaves the transaction table as soon as it is terminal.

use crate::messages::{
    ClusterMessage, CommitMessage, PrepareRequest, RollbackMessage, VoteOutcome,
};
use crate::node::GridNode;
use crate::votes::{VoteCollector, VoteTally};
use gridstore_concurrency::{ConflictType, TransactionContext};
use gridstore_core::{
    Error, Key, NodeId, Result, TransactionProtocol, TransactionStatus, TxnId, WriteOp,
};
use gridstore_durability::{Decision, ParticipantVote};
use std::collections::BTreeMap;
use std::time::Instant;

/// Prepare requests by participant
type CommitPlan = BTreeMap<NodeId, PrepareRequest>;

/// Ordered slot of each participant (total order only)
type Slots = BTreeMap<NodeId, u64>;

/// Coordinator-side commit and rollback for transactions of one node
pub struct CommitCoordinator<'a> {
    node: &'a GridNode,
}

impl<'a> CommitCoordinator<'a> {
    /// Coordinate on behalf of `node`
    pub fn new(node: &'a GridNode) -> Self {
        Self { node }
    }

    /// Commit `txn_id`
    ///
    /// # Errors
    /// - [`Error::WriteSkewDetected`] / [`Error::RolledBack`] /
    ///   [`Error::PrepareTimeout`]: rolled back, nothing applied
    /// - [`Error::InDoubt`]: applied by some participants only
    pub fn commit(&self, txn_id: TxnId) -> Result<()> {
        let handle = self.node.transactions.get(txn_id)?;
        let mut ctx = handle.lock();
        let result = self.run(&mut ctx);
        if ctx.status.is_terminal() {
            self.node.transactions.remove(txn_id);
        }
        match &result {
            Ok(()) => tracing::debug!(txn_id = %txn_id, "transaction committed"),
            Err(e) if e.is_in_doubt() => {
                tracing::error!(txn_id = %txn_id, error = %e, "commit applied partially")
            }
            Err(e) => tracing::debug!(txn_id = %txn_id, error = %e, "commit failed"),
        }
        result
    }

    /// Roll back `txn_id` before it starts committing
    pub fn rollback(&self, txn_id: TxnId) -> Result<()> {
        let handle = self.node.transactions.get(txn_id)?;
        {
            let mut ctx = handle.lock();
            ctx.ensure_active()?;
            ctx.transition(TransactionStatus::RollingBack)?;
            ctx.transition(TransactionStatus::RolledBack)?;
        }
        self.node.transactions.remove(txn_id);
        tracing::debug!(txn_id = %txn_id, "transaction rolled back");
        Ok(())
    }

    fn run(&self, ctx: &mut TransactionContext) -> Result<()> {
        ctx.ensure_active()?;
        ctx.transition(TransactionStatus::Preparing)?;

        if ctx.is_read_only() {
            ctx.transition(TransactionStatus::Prepared)?;
            ctx.transition(TransactionStatus::Committing)?;
            ctx.transition(TransactionStatus::Committed)?;
            return Ok(());
        }

        let plan = match self.plan(ctx) {
            Ok(plan) => plan,
            Err(e) => {
                ctx.transition(TransactionStatus::RollingBack)?;
                ctx.transition(TransactionStatus::RolledBack)?;
                return Err(e);
            }
        };
        let participants: Vec<NodeId> = plan.keys().copied().collect();
        ctx.participants = participants.iter().copied().collect();
        let recoverable =
            self.node.config().transaction.recovery_enabled && participants.len() > 1;
        let txn_id = ctx.txn_id;

        if recoverable {
            self.node
                .recovery_log
                .record_prepared(txn_id, self.node.id(), &participants);
        }

        let collector = self.node.votes.open(txn_id, participants.iter().copied());
        let slots = match ctx.protocol {
            TransactionProtocol::TwoPhase => {
                self.send_prepares(&plan, &collector);
                Slots::new()
            }
            TransactionProtocol::TotalOrder => self.send_ordered(&plan, &collector),
        };
        let deadline = Instant::now() + self.node.config().prepare_timeout();
        let tally = collector.wait_until(deadline);
        self.node.votes.close(txn_id);

        if recoverable {
            for (node, outcome) in collector.votes() {
                let vote = if outcome.is_prepared() {
                    ParticipantVote::Prepared
                } else {
                    ParticipantVote::Aborted
                };
                self.journal(self.node.recovery_log.record_vote(txn_id, node, vote));
            }
        }

        match tally {
            VoteTally::AllPrepared => {
                ctx.transition(TransactionStatus::Prepared)?;
                self.deliver_commit(ctx, &participants, &slots, recoverable)
            }
            VoteTally::Rejected { node, conflict } => {
                self.abort(ctx, &participants, &slots, recoverable)?;
                Err(match conflict {
                    ConflictType::WriteSkew {
                        key,
                        expected,
                        actual,
                    } => Error::WriteSkewDetected {
                        txn_id,
                        key,
                        expected,
                        actual,
                    },
                    other => Error::RolledBack {
                        txn_id,
                        reason: format!("{node} refused to prepare: {other}"),
                    },
                })
            }
            VoteTally::Unreachable(node) => {
                self.abort(ctx, &participants, &slots, recoverable)?;
                Err(Error::RolledBack {
                    txn_id,
                    reason: format!("participant {node} unreachable during prepare"),
                })
            }
            VoteTally::Missing(pending) => {
                self.abort(ctx, &participants, &slots, recoverable)?;
                Err(Error::PrepareTimeout { txn_id, pending })
            }
        }
    }

    /// Split the write set by live owner
    fn plan(&self, ctx: &TransactionContext) -> Result<CommitPlan> {
        let mut writes: BTreeMap<NodeId, Vec<(Key, WriteOp)>> = BTreeMap::new();
        for (key, op) in ctx.write_set() {
            for owner in self.node.membership.live_owners(key)? {
                writes.entry(owner).or_default().push((key.clone(), op.clone()));
            }
        }

        let participants: Vec<NodeId> = writes.keys().copied().collect();
        let membership = &self.node.membership;

        Ok(writes
            .into_iter()
            .map(|(node, writes)| {
                let reads = ctx.reads_to_validate(|key| membership.is_owner(node, key));
                let request = PrepareRequest {
                    txn_id: ctx.txn_id,
                    coordinator: self.node.id(),
                    participants: participants.clone(),
                    reads,
                    writes,
                    validate: ctx.validates_reads(),
                };
                (node, request)
            })
            .collect())
    }

    /// Two-phase prepare, stopping at the first refusal
    fn send_prepares(&self, plan: &CommitPlan, collector: &VoteCollector) {
        for (node, request) in plan {
            let outcome = match self.node.transport.call(
                self.node.id(),
                *node,
                &ClusterMessage::Prepare(request.clone()),
            ) {
                Ok(ClusterMessage::Vote(vote)) => vote.outcome,
                Ok(other) => {
                    tracing::warn!(participant = %node, kind = %other.kind(), "unexpected answer to prepare");
                    VoteOutcome::Unreachable
                }
                Err(e) => {
                    tracing::debug!(txn_id = %request.txn_id, participant = %node, error = %e, "prepare not delivered");
                    VoteOutcome::Unreachable
                }
            };
            let prepared = outcome.is_prepared();
            collector.record(*node, outcome);
            if !prepared {
                break;
            }
        }
    }

    /// Stamp and send ordered prepares; votes arrive through the registry
    fn send_ordered(&self, plan: &CommitPlan, collector: &VoteCollector) -> Slots {
        let participants: Vec<NodeId> = plan.keys().copied().collect();
        let stamp = self.node.sequencer.stamp(&participants);

        for (node, request) in plan {
            let Some(seq) = stamp.slot(*node) else {
                continue;
            };
            let skipped = stamp.skipped_for(*node);
            let message = ClusterMessage::OrderedPrepare {
                seq,
                skipped: skipped.clone(),
                request: request.clone(),
            };
            if let Err(e) = self.node.transport.send(self.node.id(), *node, &message) {
                tracing::debug!(txn_id = %request.txn_id, participant = %node, seq, error = %e, "ordered prepare not delivered");
                for gap in skipped.into_iter().chain(std::iter::once(seq)) {
                    self.node.sequencer.abandon(*node, gap);
                }
                collector.record(*node, VoteOutcome::Unreachable);
            }
        }
        stamp.slots
    }

    fn deliver_commit(
        &self,
        ctx: &mut TransactionContext,
        participants: &[NodeId],
        slots: &Slots,
        recoverable: bool,
    ) -> Result<()> {
        let txn_id = ctx.txn_id;
        if recoverable {
            self.journal(self.node.recovery_log.record_decision(txn_id, Decision::Commit));
        }

        let mut applied: Vec<NodeId> = Vec::new();
        let mut undelivered: Vec<NodeId> = Vec::new();
        for node in participants {
            let message = ClusterMessage::Commit(CommitMessage {
                txn_id,
                seq: slots.get(node).copied(),
            });
            match self.node.transport.call(self.node.id(), *node, &message) {
                Ok(_) => {
                    if applied.is_empty() {
                        ctx.transition(TransactionStatus::Committing)?;
                    }
                    applied.push(*node);
                    if recoverable {
                        self.journal(self.node.recovery_log.record_ack(txn_id, *node).map(|_| ()));
                    }
                }
                Err(e) if applied.is_empty() => {
                    tracing::warn!(txn_id = %txn_id, participant = %node, error = %e, "commit reached no participant, rolling back");
                    self.abort(ctx, participants, slots, recoverable)?;
                    return Err(Error::RolledBack {
                        txn_id,
                        reason: format!("commit could not reach {node}: {e}"),
                    });
                }
                Err(e) => {
                    tracing::warn!(txn_id = %txn_id, participant = %node, error = %e, "commit not delivered");
                    undelivered.push(*node);
                }
            }
        }

        if undelivered.is_empty() {
            ctx.transition(TransactionStatus::Committed)?;
            return Ok(());
        }

        ctx.transition(TransactionStatus::InDoubt)?;
        if recoverable {
            self.journal(self.node.recovery_log.mark_in_doubt(txn_id));
        }
        Err(Error::InDoubt {
            txn_id,
            reason: format!("applied on {applied:?}, not delivered to {undelivered:?}"),
        })
    }

    fn abort(
        &self,
        ctx: &mut TransactionContext,
        participants: &[NodeId],
        slots: &Slots,
        recoverable: bool,
    ) -> Result<()> {
        let txn_id = ctx.txn_id;
        ctx.transition(TransactionStatus::RollingBack)?;
        if recoverable {
            self.journal(self.node.recovery_log.record_decision(txn_id, Decision::Abort));
        }

        for node in participants {
            let message = ClusterMessage::Rollback(RollbackMessage {
                txn_id,
                seq: slots.get(node).copied(),
            });
            match self.node.transport.send(self.node.id(), *node, &message) {
                Ok(()) if recoverable => {
                    self.journal(self.node.recovery_log.record_ack(txn_id, *node).map(|_| ()));
                }
                Ok(()) => {}
                Err(e) => {
                    tracing::debug!(txn_id = %txn_id, participant = %node, error = %e, "rollback not delivered");
                }
            }
        }

        ctx.transition(TransactionStatus::RolledBack)
    }

    fn journal(&self, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(node = %self.node.id(), error = %e, "recovery log update failed");
        }
    }
}
