//! A grid node
//!
//! A [`GridNode`] owns one member's share of the grid:
//! - the version store, behind the local concurrency controller
//! - the L1 directory (keys it owns that others cached) and its near cache
//! - the total-order scheduler for ordered prepares
//! - its recovery log and the outcomes it has applied
//! - the transactions it coordinates, in an arena keyed by id
//!
//! It is also the participant side of every commit protocol: the
//! [`MessageHandler`] impl at the bottom of this file handles prepares,
//! decisions, invalidations and remote reads from other nodes.

use crate::coordinator::CommitCoordinator;
use crate::messages::{
    ClusterMessage, CommitMessage, InvalidateMessage, PrepareRequest, RollbackMessage,
    VoteMessage, VoteOutcome,
};
use crate::outcomes::RecentOutcomes;
use crate::ownership::Membership;
use crate::sequencer::Sequencer;
use crate::transport::{MessageHandler, Transport};
use crate::txn_table::TransactionTable;
use crate::votes::VoteRegistry;
use chrono::Utc;
use gridstore_concurrency::{
    LocalConcurrencyController, OrderedEntry, PrepareMode, TotalOrderScheduler,
    TransactionContext,
};
use gridstore_core::{
    Error, GridConfig, Key, NodeId, ReadResult, Result, TransactionOrigin, TransactionProtocol,
    TransactionStatus, TxnId, VersionedValue,
};
use gridstore_durability::{Decision, RecoveryLog};
use gridstore_storage::{AppliedWrite, L1Directory, NearCache, VersionStore};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One member of the grid
pub struct GridNode {
    id: NodeId,
    config: Arc<GridConfig>,
    pub(crate) controller: LocalConcurrencyController,
    near_cache: NearCache,
    l1_directory: L1Directory,
    scheduler: Mutex<TotalOrderScheduler<PrepareRequest>>,
    pub(crate) recovery_log: RecoveryLog,
    outcomes: RecentOutcomes,
    pub(crate) votes: VoteRegistry,
    pub(crate) transactions: TransactionTable,
    next_txn: AtomicU64,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) membership: Arc<Membership>,
    pub(crate) sequencer: Arc<Sequencer>,
    running: AtomicBool,
}

impl GridNode {
    /// Create a node; it does not receive messages until registered with the transport
    pub fn new(
        id: NodeId,
        config: Arc<GridConfig>,
        transport: Arc<dyn Transport>,
        membership: Arc<Membership>,
        sequencer: Arc<Sequencer>,
    ) -> Self {
        let store = Arc::new(VersionStore::new());
        let controller = LocalConcurrencyController::new(store, config.lock_acquisition_timeout());
        let outcomes = RecentOutcomes::new(config.transaction.outcome_history);
        Self {
            id,
            config,
            controller,
            near_cache: NearCache::new(),
            l1_directory: L1Directory::new(),
            scheduler: Mutex::new(TotalOrderScheduler::new()),
            recovery_log: RecoveryLog::new(),
            outcomes,
            votes: VoteRegistry::new(),
            transactions: TransactionTable::new(),
            next_txn: AtomicU64::new(0),
            transport,
            membership,
            sequencer,
            running: AtomicBool::new(true),
        }
    }

    /// Node id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Configuration shared by the cluster
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Committed entries held by this node
    pub fn store(&self) -> &VersionStore {
        self.controller.store()
    }

    /// Copies of remote keys
    pub fn near_cache(&self) -> &NearCache {
        &self.near_cache
    }

    /// Requestors of keys this node owns
    pub fn l1_directory(&self) -> &L1Directory {
        &self.l1_directory
    }

    /// This node's recovery ledger
    pub fn recovery_log(&self) -> &RecoveryLog {
        &self.recovery_log
    }

    /// Transactions coordinated here
    pub fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    /// Whether the node accepts work
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting work
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::NodeUnavailable(self.id))
        }
    }

    // ========================================================================
    // Coordinator-side API
    // ========================================================================

    /// Start a transaction coordinated by this node
    pub fn begin(&self, origin: TransactionOrigin) -> Result<TxnId> {
        self.ensure_running()?;
        let counter = self.next_txn.fetch_add(1, Ordering::Relaxed) + 1;
        let txn_id = TxnId::new(self.id, counter);
        self.transactions
            .insert(TransactionContext::new(txn_id, origin, &self.config));
        tracing::debug!(txn_id = %txn_id, ?origin, "transaction started");
        Ok(txn_id)
    }

    /// Commit a transaction coordinated here
    pub fn commit(&self, txn_id: TxnId) -> Result<()> {
        self.ensure_running()?;
        CommitCoordinator::new(self).commit(txn_id)
    }

    /// Roll back a transaction that has not started committing
    pub fn rollback(&self, txn_id: TxnId) -> Result<()> {
        CommitCoordinator::new(self).rollback(txn_id)
    }

    /// Status of a transaction coordinated here
    pub fn status(&self, txn_id: TxnId) -> Option<TransactionStatus> {
        self.transactions.status(txn_id)
    }

    /// Read the committed value of `key` as seen from this node
    ///
    /// Owned keys come from the local store. Other keys come from the near
    /// cache when L1 is enabled, or from the first live owner.
    pub fn read(&self, key: &Key) -> Result<ReadResult> {
        self.ensure_running()?;
        let owners = self.membership.live_owners(key)?;
        if owners.contains(&self.id) {
            return Ok(self.store().read(key));
        }

        let l1 = self.config.clustering.l1_enabled;
        if l1 {
            if let Some(cached) = self.near_cache.get(key) {
                return Ok(ReadResult {
                    value: Some(cached.value),
                    version: Some(cached.version),
                });
            }
        }

        let ticket = self.near_cache.begin_fetch();
        let request = ClusterMessage::Get {
            key: key.clone(),
            requestor: self.id,
            register_l1: l1,
        };
        let mut last_error = Error::NodeUnavailable(owners[0]);
        for owner in owners {
            match self.transport.call(self.id, owner, &request) {
                Ok(ClusterMessage::Value(result)) => {
                    if l1 {
                        if let (Some(value), Some(version)) = (&result.value, result.version) {
                            self.near_cache.complete_fetch(
                                ticket,
                                key.clone(),
                                VersionedValue {
                                    value: value.clone(),
                                    version,
                                    timestamp: Utc::now().timestamp_millis(),
                                },
                            );
                        }
                    }
                    return Ok(result);
                }
                Ok(other) => {
                    return Err(Error::Internal(format!(
                        "unexpected {} in answer to get",
                        other.kind()
                    )))
                }
                Err(e @ Error::NodeUnavailable(_)) => {
                    tracing::debug!(key = %key, owner = %owner, "owner unreachable, trying next");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    // ========================================================================
    // Participant side
    // ========================================================================

    fn prepare_local(&self, request: &PrepareRequest, mode: PrepareMode) -> VoteOutcome {
        let prepared = self.controller.prepare(
            request.txn_id,
            request.coordinator,
            &request.reads,
            request.writes.clone(),
            mode,
        );
        match prepared {
            Ok(()) => {
                if request.is_distributed() && request.coordinator != self.id {
                    self.recovery_log.record_prepared(
                        request.txn_id,
                        request.coordinator,
                        &request.participants,
                    );
                }
                VoteOutcome::Prepared
            }
            Err(conflict) => {
                self.outcomes.insert(request.txn_id, Decision::Abort);
                VoteOutcome::Rejected(conflict)
            }
        }
    }

    fn on_ordered_prepare(&self, seq: u64, skipped: Vec<u64>, request: PrepareRequest) {
        let ready = {
            let mut scheduler = self.scheduler.lock();
            let mut ready = Vec::new();
            for gap in skipped {
                ready.extend(scheduler.skip(gap));
            }
            ready.extend(scheduler.deliver(seq, request));
            ready
        };
        self.run_ordered(ready);
    }

    /// Validate released ordered prepares and send their votes
    fn run_ordered(&self, ready: Vec<OrderedEntry<PrepareRequest>>) {
        let mut queue: VecDeque<OrderedEntry<PrepareRequest>> = ready.into();
        while let Some(OrderedEntry { seq, command: request }) = queue.pop_front() {
            let outcome = self.prepare_local(&request, PrepareMode::ordered(request.validate));
            if !outcome.is_prepared() {
                // Nothing is parked, so the keys are free for the next slot
                queue.extend(self.scheduler.lock().complete(request.txn_id));
            }
            tracing::debug!(node = %self.id, seq, txn_id = %request.txn_id, prepared = outcome.is_prepared(), "ordered prepare processed");

            let vote = ClusterMessage::Vote(VoteMessage {
                txn_id: request.txn_id,
                node: self.id,
                outcome,
            });
            if let Err(e) = self.transport.send(self.id, request.coordinator, &vote) {
                tracing::warn!(txn_id = %request.txn_id, coordinator = %request.coordinator, error = %e, "vote not delivered");
            }
        }
    }

    fn on_commit(&self, message: CommitMessage) -> Result<()> {
        match self.controller.commit(message.txn_id) {
            Ok(applied) => {
                self.finish_commit(message.txn_id, applied);
                Ok(())
            }
            Err(Error::UnknownTransaction(txn_id))
                if self.outcome_of(txn_id) == Some(Decision::Commit) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn finish_commit(&self, txn_id: TxnId, applied: Vec<AppliedWrite>) {
        let keys: Vec<Key> = applied.into_iter().map(|a| a.key).collect();
        self.near_cache.invalidate(&keys);
        self.send_invalidations(&keys);
        self.outcomes.insert(txn_id, Decision::Commit);
        self.forget_participant_record(txn_id);
        tracing::debug!(node = %self.id, txn_id = %txn_id, keys = keys.len(), "commit applied");

        let ready = self.scheduler.lock().complete(txn_id);
        self.run_ordered(ready);
    }

    fn send_invalidations(&self, keys: &[Key]) {
        if !self.config.clustering.l1_enabled {
            return;
        }
        for (node, keys) in self.l1_directory.take_invalidations(keys, self.id) {
            let message = ClusterMessage::Invalidate(InvalidateMessage { keys });
            if let Err(e) = self.transport.send(self.id, node, &message) {
                tracing::debug!(requestor = %node, error = %e, "invalidation not delivered");
            }
        }
    }

    fn on_rollback(&self, message: RollbackMessage) {
        let was_prepared = self.controller.rollback(message.txn_id);
        self.outcomes.insert(message.txn_id, Decision::Abort);
        self.forget_participant_record(message.txn_id);
        tracing::debug!(node = %self.id, txn_id = %message.txn_id, was_prepared, "rollback applied");

        if message.seq.is_some() {
            let ready = self.scheduler.lock().cancel(message.txn_id, message.seq);
            self.run_ordered(ready);
        }
    }

    fn forget_participant_record(&self, txn_id: TxnId) {
        let participant_copy = self
            .recovery_log
            .get(txn_id)
            .map(|record| record.coordinator != self.id)
            .unwrap_or(false);
        if participant_copy {
            self.recovery_log.purge(txn_id);
        }
    }

    fn on_get(&self, key: Key, requestor: NodeId, register_l1: bool) -> ReadResult {
        if register_l1 && requestor != self.id && self.config.clustering.l1_enabled {
            // Register before reading: a commit racing with this read will
            // then always invalidate the copy
            self.l1_directory.register(&key, requestor);
        }
        self.store().read(&key)
    }

    // ========================================================================
    // Failure handling and recovery
    // ========================================================================

    /// React to `dead` leaving the cluster
    ///
    /// - votes still expected from it count as unreachable
    /// - it no longer holds near-cache copies
    /// - copies fetched from it are dropped: no surviving owner knows of them
    /// - undecided transactions it coordinated become in doubt
    /// - single-participant transactions it coordinated that are prepared
    ///   here roll back (only this node could have applied them)
    pub fn on_node_failure(&self, dead: NodeId) {
        let failed_votes = self.votes.fail_node(dead);
        self.l1_directory.forget_node(dead);
        let dropped_copies = self
            .near_cache
            .invalidate_where(|key| self.membership.is_owner(dead, key));
        let in_doubt = self.recovery_log.mark_in_doubt_for(dead);

        let orphans: Vec<TxnId> = self
            .controller
            .prepared_by(dead)
            .into_iter()
            .filter(|txn| !self.recovery_log.contains(*txn))
            .collect();
        for txn in &orphans {
            self.abort_locally(*txn);
        }

        tracing::info!(
            node = %self.id,
            dead = %dead,
            failed_votes,
            dropped_copies,
            in_doubt = in_doubt.len(),
            orphans = orphans.len(),
            "handled node failure"
        );
    }

    fn abort_locally(&self, txn_id: TxnId) -> bool {
        let was_prepared = self.controller.rollback(txn_id);
        self.outcomes.insert(txn_id, Decision::Abort);
        if was_prepared && self.config.transaction.protocol == TransactionProtocol::TotalOrder {
            let ready = self.scheduler.lock().cancel(txn_id, None);
            self.run_ordered(ready);
        }
        was_prepared
    }

    /// Apply a forced or learned decision to this node's share of `txn_id`
    ///
    /// Returns whether this node held prepared state for the transaction.
    pub fn resolve_locally(&self, txn_id: TxnId, decision: Decision) -> Result<bool> {
        let held = match decision {
            Decision::Commit => match self.controller.commit(txn_id) {
                Ok(applied) => {
                    self.finish_commit(txn_id, applied);
                    true
                }
                Err(Error::UnknownTransaction(_)) => false,
                Err(e) => return Err(e),
            },
            Decision::Abort => self.abort_locally(txn_id),
            Decision::Unknown => {
                return Err(Error::InvalidOperation(
                    "cannot resolve a transaction to an unknown decision".to_string(),
                ))
            }
        };

        if self.recovery_log.contains(txn_id) {
            self.recovery_log.record_decision(txn_id, decision)?;
            self.recovery_log.purge(txn_id);
        }
        self.outcomes.insert(txn_id, decision);
        Ok(held)
    }

    /// Recently applied decisions
    pub fn outcomes(&self) -> &RecentOutcomes {
        &self.outcomes
    }

    /// Decision this node applied for `txn_id`, if any
    pub fn outcome_of(&self, txn_id: TxnId) -> Option<Decision> {
        self.outcomes.get(txn_id)
    }

    /// Whether this node holds prepared writes for `txn_id`
    pub fn is_prepared(&self, txn_id: TxnId) -> bool {
        self.controller.is_prepared(txn_id)
    }

    /// Whether nothing is in flight on this node
    pub fn is_quiescent(&self) -> bool {
        self.transactions.is_empty()
            && self.controller.prepared_count() == 0
            && self.scheduler.lock().is_idle()
            && self.votes.is_empty()
    }
}

impl MessageHandler for GridNode {
    fn handle(&self, from: NodeId, message: ClusterMessage) -> Result<ClusterMessage> {
        self.ensure_running()?;
        match message {
            ClusterMessage::Prepare(request) => {
                let outcome = self.prepare_local(&request, PrepareMode::two_phase(request.validate));
                Ok(ClusterMessage::Vote(VoteMessage {
                    txn_id: request.txn_id,
                    node: self.id,
                    outcome,
                }))
            }
            ClusterMessage::OrderedPrepare {
                seq,
                skipped,
                request,
            } => {
                self.on_ordered_prepare(seq, skipped, request);
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::Vote(vote) => {
                self.votes.deliver(vote);
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::Commit(commit) => {
                self.on_commit(commit)?;
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::Rollback(rollback) => {
                self.on_rollback(rollback);
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::Invalidate(InvalidateMessage { keys }) => {
                self.near_cache.invalidate(&keys);
                Ok(ClusterMessage::Ack)
            }
            ClusterMessage::Get {
                key,
                requestor,
                register_l1,
            } => Ok(ClusterMessage::Value(self.on_get(key, requestor, register_l1))),
            other @ (ClusterMessage::Value(_) | ClusterMessage::Ack) => {
                Err(Error::InvalidOperation(format!(
                    "{} from {} is not a request",
                    other.kind(),
                    from
                )))
            }
        }
    }
}

impl std::fmt::Debug for GridNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridNode")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("entries", &self.store().len())
            .field("transactions", &self.transactions.len())
            .field("prepared", &self.controller.prepared_count())
            .finish()
    }
}
