//! Recovery ledger for the grid
//!
//! This crate keeps track of multi-participant transactions until every
//! participant has seen their outcome:
//! - RecoveryRecord: participants, votes, decision, acknowledgements
//! - RecoveryEntry types: Prepared, Voted, Decided, Acknowledged, MarkedInDoubt, Purged
//! - RecoveryLog: append-mostly journal folded into materialized records
//! - Journal encoding with MessagePack
//!
//! The ledger is in memory. It survives the loss of a coordinator because
//! every participant of a recoverable transaction keeps its own copy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod journal;
pub mod log;
pub mod record;

pub use encoding::{decode_journal, encode_journal};
pub use journal::RecoveryEntry;
pub use log::RecoveryLog;
pub use record::{Decision, ParticipantVote, RecoveryRecord};
