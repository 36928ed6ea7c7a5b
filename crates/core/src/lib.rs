//! Core types for the gridstore data grid
//!
//! This crate defines the vocabulary shared by every layer:
//! - Identifiers: [`NodeId`], [`TxnId`], [`Key`]
//! - Values: [`Value`], [`VersionedValue`], [`WriteOp`]
//! - The transaction status machine: [`TransactionStatus`]
//! - The error taxonomy: [`Error`]
//! - Typed configuration: [`GridConfig`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod status;
pub mod types;
pub mod value;

pub use config::{
    ClusteringConfig, GridConfig, IsolationLevel, LockingConfig, TransactionConfig,
    TransactionProtocol, VersioningConfig, VersioningScheme,
};
pub use error::{Error, Result};
pub use status::{TransactionOrigin, TransactionStatus};
pub use types::{Key, NodeId, TxnId};
pub use value::{ReadResult, Timestamp, Value, VersionedValue, WriteOp};
