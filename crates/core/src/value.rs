//! Value types stored in the grid
//!
//! [`Value`] is the payload type. Entries in the version store carry a
//! [`VersionedValue`]; buffered transactional writes are [`WriteOp`]s.
//!
//! ## Equality Rules
//!
//! - Different types are never equal (no coercion)
//! - `Int(1)` != `Float(1.0)`
//! - `String("abc")` != `Bytes([97, 98, 99])`
//! - Float uses IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`

use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds
pub type Timestamp = i64;

/// Grid value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit IEEE-754 float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Arbitrary bytes, distinct from String
    Bytes(Vec<u8>),
}

impl Value {
    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
        }
    }

    /// Try to get as i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// A committed value together with its entry version
///
/// The version is the per-key counter maintained by the version store. It is
/// what optimistic validation compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// The value
    pub value: Value,
    /// Per-key version (starts at 1, strictly increasing)
    pub version: u64,
    /// When this version was committed
    pub timestamp: Timestamp,
}

/// Result of reading a key from its owner
///
/// `version` is present for tombstones too: a removed key still has a
/// version, so a reader that saw it absent can detect a later re-creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResult {
    /// Live value, `None` if absent or removed
    pub value: Option<Value>,
    /// Entry version, `None` if the key was never written
    pub version: Option<u64>,
}

impl ReadResult {
    /// A read of a key that was never written
    pub fn absent() -> Self {
        Self::default()
    }
}

/// A buffered write in a transaction's write set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Store a value
    Put(Value),
    /// Remove the key
    Remove,
}

impl WriteOp {
    /// Value visible to the writing transaction after this op
    pub fn visible_value(&self) -> Option<&Value> {
        match self {
            WriteOp::Put(v) => Some(v),
            WriteOp::Remove => None,
        }
    }
}
