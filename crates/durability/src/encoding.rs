//! Journal encoding
//!
//! A journal is shipped or archived as one MessagePack array of entries.

use crate::journal::RecoveryEntry;
use gridstore_core::{Error, Result};

/// Encode journal entries
pub fn encode_journal(entries: &[RecoveryEntry]) -> Result<Vec<u8>> {
    rmp_serde::to_vec(entries).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode journal entries produced by [`encode_journal`]
pub fn decode_journal(bytes: &[u8]) -> Result<Vec<RecoveryEntry>> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
}
