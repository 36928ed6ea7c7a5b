//! Grid Transaction Integration Tests
//!
//! End-to-end behaviour of multi-node clusters: invocation batching, write
//! skew detection under both commit protocols, L1 invalidation, coordinator
//! failure and operator recovery, manager lifecycle.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test grid_transactions
//! cargo test --test grid_transactions recovery::
//! ```

mod common;

mod batch;
mod l1;
mod lifecycle;
mod recovery;
mod total_order;
mod write_skew;
