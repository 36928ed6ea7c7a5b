//! Total-order sequencer
//!
//! Stamps each ordered prepare with a cluster-wide number and one slot per
//! destination, all under one lock, so:
//! - global numbers are unique and strictly increasing
//! - slots at each destination are gap-free and strictly increasing
//! - two destinations never see two transactions in opposite orders
//!
//! A slot whose message could not be delivered is abandoned; the next stamp
//! for that destination carries it in `skipped` so the destination can move
//! past the gap.

use gridstore_core::NodeId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Numbers assigned to one ordered prepare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStamp {
    /// Cluster-wide number
    pub global: u64,
    /// Slot at each destination
    pub slots: BTreeMap<NodeId, u64>,
    /// Abandoned slots each destination must skip first
    pub skipped: BTreeMap<NodeId, Vec<u64>>,
}

impl SequenceStamp {
    /// Slot at `node`
    pub fn slot(&self, node: NodeId) -> Option<u64> {
        self.slots.get(&node).copied()
    }

    /// Abandoned slots `node` must skip
    pub fn skipped_for(&self, node: NodeId) -> Vec<u64> {
        self.skipped.get(&node).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct SequencerState {
    global: u64,
    slots: FxHashMap<NodeId, u64>,
    abandoned: FxHashMap<NodeId, Vec<u64>>,
}

/// Cluster-wide stamping service
#[derive(Debug, Default)]
pub struct Sequencer {
    state: Mutex<SequencerState>,
}

impl Sequencer {
    /// Create a sequencer; the first stamp is global 1, slot 1 everywhere
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a message for `destinations`
    pub fn stamp(&self, destinations: &[NodeId]) -> SequenceStamp {
        let mut state = self.state.lock();
        state.global += 1;
        let global = state.global;

        let mut slots = BTreeMap::new();
        let mut skipped = BTreeMap::new();
        for node in destinations {
            let slot = state.slots.entry(*node).or_insert(0);
            *slot += 1;
            slots.insert(*node, *slot);
            if let Some(gaps) = state.abandoned.remove(node) {
                skipped.insert(*node, gaps);
            }
        }
        SequenceStamp {
            global,
            slots,
            skipped,
        }
    }

    /// Record that `slot` never reached `node`
    pub fn abandon(&self, node: NodeId, slot: u64) {
        tracing::debug!(node = %node, slot, "abandoning ordered slot");
        self.state.lock().abandoned.entry(node).or_default().push(slot);
    }

    /// Drop all state for a departed node
    pub fn forget(&self, node: NodeId) {
        let mut state = self.state.lock();
        state.slots.remove(&node);
        state.abandoned.remove(&node);
    }

    /// Last global number handed out
    pub fn current(&self) -> u64 {
        self.state.lock().global
    }
}
