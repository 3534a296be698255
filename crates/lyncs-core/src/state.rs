//! Shared key-value state for a scheduling run.
//!
//! The map is owned by the caller. [`SharedState`] is the lock the scheduler
//! reads and merges through; callers that share it with other code pass it
//! in directly, others hand over a plain [`StateMap`] via
//! [`Runtime::execute_map`](crate::Runtime::execute_map).

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use crate::error::{Result, lock_error};

/// Key to opaque value. Absent keys are deleted or never written.
pub type StateMap = HashMap<String, Vec<u8>>;

/// A [`StateMap`] behind a read/write lock.
#[derive(Debug, Default)]
pub struct SharedState {
    map: RwLock<StateMap>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.map.read().map_err(|e| lock_error("state", e))?;
        Ok(map.get(key).cloned())
    }

    /// Current values of the given keys, taken under one read lock.
    ///
    /// Keys with no value are left out.
    pub fn snapshot<'k>(
        &self,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let map = self.map.read().map_err(|e| lock_error("state", e))?;
        Ok(keys
            .into_iter()
            .filter_map(|key| map.get(key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    /// Merge writes under one write lock. An empty value removes the key.
    pub fn apply(&self, writes: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut map = self.map.write().map_err(|e| lock_error("state", e))?;
        for (key, value) in writes {
            if value.is_empty() {
                map.remove(key);
            } else {
                map.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Give the map back to the caller.
    pub fn into_inner(self) -> StateMap {
        self.map.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<StateMap> for SharedState {
    fn from(map: StateMap) -> Self {
        Self {
            map: RwLock::new(map),
        }
    }
}
