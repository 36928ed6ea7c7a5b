//! Convenient imports for gridstore.
//!
//! ```ignore
//! use gridstore::prelude::*;
//!
//! let grid = Grid::open(3)?;
//! let cache = grid.cache(0)?;
//! cache.put(&cache.session(), "key", "value")?;
//! ```

// Main entry point
pub use crate::grid::{Grid, GridBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Client surface
pub use gridstore_engine::{Cache, Session, SuspendedTransaction, TransactionManager};

// Operator surface
pub use gridstore_durability::Decision;
pub use gridstore_engine::InDoubtTransaction;

// Core types
pub use gridstore_core::{
    GridConfig, IsolationLevel, Key, NodeId, TransactionProtocol, TransactionStatus, TxnId,
    Value,
};
