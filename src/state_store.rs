//! Persisted key/value seam backing the version record.
//!
//! One store instance corresponds to one configuration domain. Hosts can
//! inject any implementor; [`crate::SledStateStore`] is the durable
//! default and [`crate::MemoryStateStore`] covers tests and ephemeral
//! setups.

use serde::{Deserialize, Serialize};

use crate::errors::SundownResult;

/// Scalar value stored under a configuration key.
///
/// The untagged encoding keeps stored bytes as plain JSON scalars, which
/// round-trip unambiguously across the three variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    /// Integer payload, if this value holds one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(int) => Some(*int),
            _ => None,
        }
    }

    /// Boolean payload, if this value holds one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    /// Consume into the text payload, if this value holds one.
    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(int: i64) -> Self {
        Value::Int(int)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

/// A single mutation inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, Value),
    Remove(String),
}

/// An ordered set of mutations applied atomically by
/// [`StateStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put of `value` under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    /// Queue a removal of `key`. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Remove(key.into()));
    }
}

impl IntoIterator for Batch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Durable string-key store holding the version record.
///
/// Implementations must apply `commit` as one atomic unit: a batch lands
/// fully or not at all, and readers never observe a torn write. Reads and
/// commits may interleave freely across threads; when two commits race,
/// the last writer wins.
pub trait StateStore: Send + Sync {
    /// Value stored under `key`, or `None` when absent.
    fn get(&self, key: &str) -> SundownResult<Option<Value>>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> SundownResult<Vec<(String, Value)>>;

    /// Apply every mutation in `batch` atomically.
    fn commit(&self, batch: Batch) -> SundownResult<()>;
}
