//! Transaction status machine
//!
//! ```text
//! Active ──► Preparing ──► Prepared ──► Committing ──► Committed
//!   │            │            │             │
//!   │            ▼            ▼             ▼
//!   └──────► RollingBack ──► RolledBack   InDoubt
//! ```
//!
//! `InDoubt` is entered when the decision for a prepared transaction cannot
//! be delivered to every participant. It is only left through recovery.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Accepting reads and writes
    Active,
    /// Prepare requests sent, collecting votes
    Preparing,
    /// Every participant voted yes
    Prepared,
    /// Commit decision being delivered
    Committing,
    /// All participants applied the writes
    Committed,
    /// Rollback decision being delivered
    RollingBack,
    /// Writes discarded everywhere
    RolledBack,
    /// Outcome not known to every participant; owned by recovery
    InDoubt,
}

impl TransactionStatus {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Active, Preparing)
                | (Active, RollingBack)
                | (Preparing, Prepared)
                | (Preparing, RollingBack)
                | (Prepared, Committing)
                | (Prepared, RollingBack)
                | (Prepared, InDoubt)
                | (Committing, Committed)
                | (Committing, InDoubt)
                | (RollingBack, RolledBack)
        )
    }

    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack | TransactionStatus::InDoubt
        )
    }

    /// Whether the transaction still accepts operations
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionStatus::Active)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Preparing => "PREPARING",
            TransactionStatus::Prepared => "PREPARED",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::RolledBack => "ROLLED_BACK",
            TransactionStatus::InDoubt => "IN_DOUBT",
        };
        f.write_str(name)
    }
}

/// Who started a transaction, and therefore who owns its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOrigin {
    /// Begun through the transaction manager
    External,
    /// Started by `start_batch`
    Batch,
    /// Synthesized around a single non-transactional call
    Implicit,
}
