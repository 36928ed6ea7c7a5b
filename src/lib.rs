//! # gridstore
//!
//! Transactional in-memory data grid.
//!
//! A cluster of nodes jointly hosts a partitioned keyspace. Transactions read
//! and write any key from any node; commits are coordinated across the
//! owners of the written keys with two-phase commit or a total-order
//! sequencer, validated against concurrent writers, and recorded so that an
//! operator can settle whatever a crashed coordinator left undecided.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gridstore::prelude::*;
//!
//! let grid = Grid::builder().nodes(3).write_skew_check().open()?;
//! let cache = grid.cache(0)?;
//! let mut session = cache.session();
//!
//! // Explicit transaction
//! cache.transaction_manager().begin(&mut session)?;
//! cache.put(&session, "user:1", "Alice")?;
//! cache.transaction_manager().commit(&mut session)?;
//!
//! // Auto-commit
//! cache.put(&session, "user:2", "Bob")?;
//! ```
//!
//! ## Layers
//!
//! - `gridstore-core`: identifiers, values, status machine, errors, config
//! - `gridstore-storage`: version store, L1 directory and near cache
//! - `gridstore-concurrency`: transaction context, validation, locks,
//!   local controller, total-order scheduler
//! - `gridstore-durability`: recovery journal and records
//! - `gridstore-engine`: nodes, transport, commit and recovery coordinators,
//!   cache facade, cluster and manager registry

#![warn(missing_docs)]

mod error;
mod grid;

pub mod prelude;

// Re-export main entry points
pub use error::{Error, Result};
pub use grid::{Grid, GridBuilder};

// Re-export the layers for direct use
pub use gridstore_concurrency as concurrency;
pub use gridstore_durability as durability;
pub use gridstore_engine as engine;
pub use gridstore_storage as storage;
