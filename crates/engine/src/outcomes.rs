//! Decisions a node applied, most recent first to go
//!
//! Participants consult this history to acknowledge a repeated commit and to
//! answer recovery's "what did you apply?" question. It keeps the last
//! `capacity` transactions; older decisions are forgotten in arrival order.

use gridstore_core::TxnId;
use gridstore_durability::Decision;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct Window {
    decisions: FxHashMap<TxnId, Decision>,
    order: VecDeque<TxnId>,
}

/// Bounded map of transaction outcomes
#[derive(Debug)]
pub struct RecentOutcomes {
    capacity: usize,
    window: Mutex<Window>,
}

impl RecentOutcomes {
    /// Remember at most `capacity` transactions
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    /// Record `decision` for `txn_id`, replacing an earlier one
    pub fn insert(&self, txn_id: TxnId, decision: Decision) {
        let mut window = self.window.lock();
        if window.decisions.insert(txn_id, decision).is_none() {
            window.order.push_back(txn_id);
        }
        while window.order.len() > self.capacity {
            if let Some(oldest) = window.order.pop_front() {
                window.decisions.remove(&oldest);
            }
        }
    }

    /// Decision remembered for `txn_id`
    pub fn get(&self, txn_id: TxnId) -> Option<Decision> {
        self.window.lock().decisions.get(&txn_id).copied()
    }

    /// Number of remembered transactions
    pub fn len(&self) -> usize {
        self.window.lock().decisions.len()
    }

    /// Whether nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
