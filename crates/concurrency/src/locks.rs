//! Per-key exclusive locks for two-phase prepare
//!
//! A prepared transaction holds the lock of every key it writes on that node
//! until commit or rollback, so no other transaction can validate and apply
//! the same key in between.
//!
//! Acquisition is all-or-nothing: either every requested key is granted or
//! none is. The table's mutex is only held while inspecting the map, never
//! while a transaction is prepared, so disjoint keys never wait on each
//! other.

use gridstore_core::{Key, TxnId};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

/// Lock acquisition gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConflict {
    /// First key that was still held
    pub key: Key,
    /// Holder of that key when the wait ended
    pub holder: TxnId,
}

/// Lock table of one node
#[derive(Debug, Default)]
pub struct KeyLockTable {
    holders: Mutex<FxHashMap<Key, TxnId>>,
    released: Condvar,
}

impl KeyLockTable {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key in `keys` for `txn`, waiting up to `timeout`
    ///
    /// Keys already held by `txn` count as granted.
    pub fn acquire_all(&self, txn: TxnId, keys: &[Key], timeout: Duration) -> Result<(), LockConflict> {
        let deadline = Instant::now() + timeout;
        let mut holders = self.holders.lock();
        loop {
            let blocked = keys.iter().find_map(|key| match holders.get(key) {
                Some(holder) if *holder != txn => Some((key.clone(), *holder)),
                _ => None,
            });

            match blocked {
                None => {
                    for key in keys {
                        holders.insert(key.clone(), txn);
                    }
                    return Ok(());
                }
                Some((key, holder)) => {
                    if self.released.wait_until(&mut holders, deadline).timed_out() {
                        // One last look: the release may have raced the timeout
                        let still_held = keys
                            .iter()
                            .any(|k| matches!(holders.get(k), Some(h) if *h != txn));
                        if still_held {
                            tracing::debug!(txn_id = %txn, key = %key, holder = %holder, "lock wait timed out");
                            return Err(LockConflict { key, holder });
                        }
                    }
                }
            }
        }
    }

    /// Release the locks `txn` holds on `keys`
    pub fn release_all(&self, txn: TxnId, keys: &[Key]) {
        let mut holders = self.holders.lock();
        let mut released = false;
        for key in keys {
            if holders.get(key) == Some(&txn) {
                holders.remove(key);
                released = true;
            }
        }
        drop(holders);
        if released {
            self.released.notify_all();
        }
    }

    /// Current holder of `key`
    pub fn holder(&self, key: &Key) -> Option<TxnId> {
        self.holders.lock().get(key).copied()
    }

    /// Number of locked keys
    pub fn locked_count(&self) -> usize {
        self.holders.lock().len()
    }
}
