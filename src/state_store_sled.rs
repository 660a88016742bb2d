//! Sled-backed state store, the default durable backend.

use std::path::Path;

use tracing::warn;

use crate::errors::{SundownError, SundownResult};
use crate::state_store::{Batch, BatchOp, StateStore, Value};

/// Name of the sled tree holding the version record. One tree is one
/// configuration domain; other trees in the same database are untouched.
const STATE_TREE: &str = "sundown";

/// A sled-backed implementation of [`StateStore`].
///
/// Values are stored as serde_json scalar bytes. `commit` goes through
/// `sled::Batch::apply_batch`, so a whole batch lands atomically, and the
/// tree is flushed after every commit.
pub struct SledStateStore {
    // Keeps the database and its flusher alive for the tree's lifetime.
    _db: sled::Db,
    tree: sled::Tree,
}

impl SledStateStore {
    /// Open (or create) the database at `path` and its state tree.
    pub fn open(path: impl AsRef<Path>) -> SundownResult<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(STATE_TREE)?;
        Ok(SledStateStore { _db: db, tree })
    }

    fn encode_value(value: &Value) -> SundownResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| SundownError::store("encode_value", e))
    }

    /// Undecodable bytes read as absent: a read query must fall back to
    /// defaults rather than fail on a damaged record.
    fn decode_value(key: &str, bytes: &[u8]) -> Option<Value> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key, %error, "undecodable stored value treated as absent");
                None
            }
        }
    }
}

impl StateStore for SledStateStore {
    fn get(&self, key: &str) -> SundownResult<Option<Value>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Self::decode_value(key, &bytes)),
            None => Ok(None),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> SundownResult<Vec<(String, Value)>> {
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key_bytes, value_bytes) = item?;
            let key = String::from_utf8_lossy(&key_bytes).into_owned();
            if let Some(value) = Self::decode_value(&key, &value_bytes) {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    fn commit(&self, batch: Batch) -> SundownResult<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch {
            match op {
                BatchOp::Put(key, value) => {
                    sled_batch.insert(key.as_bytes(), Self::encode_value(&value)?);
                }
                BatchOp::Remove(key) => sled_batch.remove(key.as_bytes()),
            }
        }
        self.tree.apply_batch(sled_batch)?;
        self.tree.flush()?;
        Ok(())
    }
}
