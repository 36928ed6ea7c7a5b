//! Concurrency layer for the grid
//!
//! This crate implements per-node optimistic concurrency control:
//! - TransactionContext: read set / write set tracking
//! - Write-skew validation of observed read versions
//! - KeyLockTable: per-key exclusivity for two-phase prepare
//! - LocalConcurrencyController: prepare / commit / rollback on one node
//! - TotalOrderScheduler: in-order delivery with per-key queues

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod locks;
pub mod total_order;
pub mod transaction;
pub mod validation;

pub use controller::{LocalConcurrencyController, PrepareMode};
pub use locks::{KeyLockTable, LockConflict};
pub use total_order::{OrderedCommand, OrderedEntry, TotalOrderScheduler};
pub use transaction::{ReadRecord, TransactionContext};
pub use validation::{validate_read_set, ConflictType, ValidationResult};
