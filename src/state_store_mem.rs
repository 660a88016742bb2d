//! In-memory state store for tests and ephemeral hosts.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::errors::{SundownError, SundownResult};
use crate::state_store::{Batch, BatchOp, StateStore, Value};

/// [`StateStore`] over a lock-guarded map. Nothing survives drop.
///
/// Commits take the write guard once for the whole batch, so readers see
/// either none or all of a batch's mutations.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> SundownResult<Option<Value>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SundownError::internal("state store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> SundownResult<Vec<(String, Value)>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SundownError::internal("state store lock poisoned"))?;
        Ok(entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn commit(&self, batch: Batch) -> SundownResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SundownError::internal("state store lock poisoned"))?;
        for op in batch {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Remove(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
