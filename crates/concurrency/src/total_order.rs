//! Total-order delivery
//!
//! Ordered prepares reach a node stamped with that node's slot number. The
//! scheduler turns the arrival stream back into slot order and then into
//! per-key exclusivity:
//!
//! ```text
//! arrival (any order) ─▶ reorder buffer ─▶ per-key queues ─▶ released
//!                         (by slot)         (FIFO per key)    (validate + vote)
//! ```
//!
//! - A command enters the key queues only once every lower slot has been
//!   seen, so queue order is slot order.
//! - A command is released when it heads the queue of every key it touches.
//!   Commands on disjoint keys are released independently.
//! - A released command keeps its keys until [`TotalOrderScheduler::complete`]
//!   (commit or rollback applied).
//! - A slot that will never carry a command (its rollback overtook it, or
//!   the sender died) is filled with [`TotalOrderScheduler::skip`].
//!
//! The scheduler is a plain state machine; the node wraps it in a mutex and
//! never holds that mutex while validating or applying.

use gridstore_core::{Key, TxnId};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};

/// A command that can be ordered
pub trait OrderedCommand {
    /// Transaction the command belongs to
    fn txn_id(&self) -> TxnId;

    /// Keys the command writes on this node
    fn keys(&self) -> Vec<Key>;
}

/// A command released for processing
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedEntry<T> {
    /// Slot the command was stamped with
    pub seq: u64,
    /// The command
    pub command: T,
}

#[derive(Debug)]
enum Slot<T> {
    Command(T),
    Skip,
}

/// Reorders one node's ordered stream and serializes commands per key
#[derive(Debug)]
pub struct TotalOrderScheduler<T> {
    next_seq: u64,
    reorder: BTreeMap<u64, Slot<T>>,
    key_queues: FxHashMap<Key, VecDeque<TxnId>>,
    blocked: BTreeMap<u64, T>,
    running: FxHashMap<TxnId, Vec<Key>>,
    cancelled: FxHashSet<TxnId>,
}

impl<T: OrderedCommand> TotalOrderScheduler<T> {
    /// Create a scheduler expecting slot 1 first
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            reorder: BTreeMap::new(),
            key_queues: FxHashMap::default(),
            blocked: BTreeMap::new(),
            running: FxHashMap::default(),
            cancelled: FxHashSet::default(),
        }
    }

    /// Accept the command stamped with `seq`
    ///
    /// Returns every command that became runnable, in slot order.
    /// Duplicate and already-passed slots are ignored.
    pub fn deliver(&mut self, seq: u64, command: T) -> Vec<OrderedEntry<T>> {
        if seq < self.next_seq || self.reorder.contains_key(&seq) {
            tracing::warn!(seq, txn_id = %command.txn_id(), "ignoring duplicate ordered slot");
            return Vec::new();
        }
        self.reorder.insert(seq, Slot::Command(command));
        self.drain_in_order();
        self.release_ready()
    }

    /// Mark `seq` as carrying no command
    pub fn skip(&mut self, seq: u64) -> Vec<OrderedEntry<T>> {
        if seq < self.next_seq {
            return Vec::new();
        }
        self.reorder.entry(seq).or_insert(Slot::Skip);
        self.drain_in_order();
        self.release_ready()
    }

    /// Release the keys of a finished command
    pub fn complete(&mut self, txn: TxnId) -> Vec<OrderedEntry<T>> {
        if let Some(keys) = self.running.remove(&txn) {
            self.dequeue(txn, &keys);
        }
        self.release_ready()
    }

    /// Withdraw `txn` wherever it is
    ///
    /// `seq` is the slot it was stamped with on this node, when known. A
    /// command not yet seen has its slot skipped (or, without a slot, is
    /// dropped on arrival).
    pub fn cancel(&mut self, txn: TxnId, seq: Option<u64>) -> Vec<OrderedEntry<T>> {
        if let Some(keys) = self.running.remove(&txn) {
            self.dequeue(txn, &keys);
            return self.release_ready();
        }

        let blocked_seq = self
            .blocked
            .iter()
            .find(|(_, cmd)| cmd.txn_id() == txn)
            .map(|(seq, _)| *seq);
        if let Some(blocked_seq) = blocked_seq {
            if let Some(cmd) = self.blocked.remove(&blocked_seq) {
                self.dequeue(txn, &cmd.keys());
            }
            return self.release_ready();
        }

        let buffered_seq = self.reorder.iter().find_map(|(seq, slot)| match slot {
            Slot::Command(cmd) if cmd.txn_id() == txn => Some(*seq),
            _ => None,
        });
        if let Some(buffered_seq) = buffered_seq {
            self.reorder.insert(buffered_seq, Slot::Skip);
            self.drain_in_order();
            return self.release_ready();
        }

        match seq {
            Some(seq) => self.skip(seq),
            None => {
                self.cancelled.insert(txn);
                Vec::new()
            }
        }
    }

    /// Next slot the scheduler is waiting for
    pub fn next_expected(&self) -> u64 {
        self.next_seq
    }

    /// Whether `txn` holds its keys
    pub fn is_running(&self, txn: TxnId) -> bool {
        self.running.contains_key(&txn)
    }

    /// Number of commands waiting for a key or an earlier slot
    pub fn pending(&self) -> usize {
        self.blocked.len()
            + self
                .reorder
                .values()
                .filter(|slot| matches!(slot, Slot::Command(_)))
                .count()
    }

    /// Whether nothing is buffered, queued or running
    pub fn is_idle(&self) -> bool {
        self.reorder.is_empty() && self.blocked.is_empty() && self.running.is_empty()
    }

    fn drain_in_order(&mut self) {
        while let Some(slot) = self.reorder.remove(&self.next_seq) {
            let seq = self.next_seq;
            self.next_seq += 1;
            let Slot::Command(command) = slot else {
                continue;
            };
            let txn = command.txn_id();
            if self.cancelled.remove(&txn) {
                tracing::debug!(seq, txn_id = %txn, "dropping cancelled ordered command");
                continue;
            }
            for key in command.keys() {
                self.key_queues.entry(key).or_default().push_back(txn);
            }
            self.blocked.insert(seq, command);
        }
    }

    fn release_ready(&mut self) -> Vec<OrderedEntry<T>> {
        let ready: Vec<u64> = self
            .blocked
            .iter()
            .filter(|(_, cmd)| {
                let txn = cmd.txn_id();
                cmd.keys()
                    .iter()
                    .all(|key| self.key_queues.get(key).and_then(|q| q.front()) == Some(&txn))
            })
            .map(|(seq, _)| *seq)
            .collect();

        let mut released = Vec::with_capacity(ready.len());
        for seq in ready {
            if let Some(command) = self.blocked.remove(&seq) {
                self.running.insert(command.txn_id(), command.keys());
                released.push(OrderedEntry { seq, command });
            }
        }
        released
    }

    fn dequeue(&mut self, txn: TxnId, keys: &[Key]) {
        for key in keys {
            if let Some(queue) = self.key_queues.get_mut(key) {
                queue.retain(|queued| *queued != txn);
                if queue.is_empty() {
                    self.key_queues.remove(key);
                }
            }
        }
    }
}

impl<T: OrderedCommand> Default for TotalOrderScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
