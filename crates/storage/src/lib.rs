//! Storage layer for the grid
//!
//! This crate holds the per-node shared state that transactions validate
//! against and write into:
//! - VersionStore: committed entries with per-key version counters
//! - L1Directory: owner-side record of which nodes cache a key
//! - NearCache: requestor-side L1 copies of keys owned elsewhere

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod l1;
pub mod version_store;

pub use l1::{L1Directory, NearCache};
pub use version_store::{AppliedWrite, VersionStore};
