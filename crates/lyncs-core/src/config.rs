//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is owned by each [`Runtime`](crate::Runtime); there is
//! no process-wide default instance.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings consulted by the pool manager and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum live contexts per program, and slots per scheduling round.
    pub workers: usize,

    /// Maximum calls assigned to one slot in a round.
    pub slot_capacity: usize,

    /// Checkouts after which a context is closed instead of returned to idle.
    pub retire_after: u64,

    /// Functions every loaded program must expose.
    pub entry_points: Vec<String>,

    /// Log round plans at info level.
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            slot_capacity: 128,
            retire_after: 1000,
            entry_points: vec!["run".to_string()],
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.slot_capacity == 0 {
            return Err(Error::InvalidConfig(
                "slot_capacity must be at least 1".to_string(),
            ));
        }
        if self.retire_after == 0 {
            return Err(Error::InvalidConfig(
                "retire_after must be at least 1".to_string(),
            ));
        }
        if let Some(pos) = self.entry_points.iter().position(|name| name.is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "entry_points[{}] is empty",
                pos
            )));
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_slot_capacity(mut self, slot_capacity: usize) -> Self {
        self.slot_capacity = slot_capacity;
        self
    }

    pub fn with_retire_after(mut self, retire_after: u64) -> Self {
        self.retire_after = retire_after;
        self
    }

    pub fn with_entry_points<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_points = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
