//! Write-skew validation
//!
//! A transaction under repeatable read with write-skew checking remembers the
//! version of every key it read. At prepare each participant compares those
//! versions with its live versions; any difference means another transaction
//! committed a write to the key in between.

use gridstore_core::{Key, TxnId};
use gridstore_storage::VersionStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a participant refused to prepare
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConflictType {
    /// The key changed since the transaction read it
    #[error("write skew on '{key}': read version {expected:?}, current {actual:?}")]
    WriteSkew {
        /// Conflicting key
        key: Key,
        /// Version recorded at read time
        expected: Option<u64>,
        /// Live version at validation
        actual: Option<u64>,
    },

    /// The key stayed locked by another prepared transaction
    #[error("lock on '{key}' not acquired in time (held by {holder:?})")]
    LockTimeout {
        /// Contended key
        key: Key,
        /// Holder when the wait gave up
        holder: Option<TxnId>,
    },
}

impl ConflictType {
    /// Key the conflict is about
    pub fn key(&self) -> &Key {
        match self {
            ConflictType::WriteSkew { key, .. } | ConflictType::LockTimeout { key, .. } => key,
        }
    }
}

/// All conflicts found for one validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// A result with no conflicts
    pub fn ok() -> Self {
        Self::default()
    }

    /// Whether validation passed
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Record a conflict
    pub fn add(&mut self, conflict: ConflictType) {
        self.conflicts.push(conflict);
    }

    /// Conflicts found, in key order
    pub fn conflicts(&self) -> &[ConflictType] {
        &self.conflicts
    }

    /// First conflict, the one reported to the coordinator
    pub fn into_first(self) -> Option<ConflictType> {
        self.conflicts.into_iter().next()
    }
}

/// Compare observed read versions with the live versions in `store`
///
/// `reads` pairs each key with the version the transaction saw (`None` for a
/// key that did not exist). A key that was absent and now exists, or that
/// existed and changed, is a write skew.
pub fn validate_read_set(reads: &[(Key, Option<u64>)], store: &VersionStore) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for (key, expected) in reads {
        let actual = store.version_of(key);
        if actual != *expected {
            result.add(ConflictType::WriteSkew {
                key: key.clone(),
                expected: *expected,
                actual,
            });
        }
    }
    result
}
