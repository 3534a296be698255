//! Calls, key rules, sessions and call outputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a call touches a state key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
}

impl Access {
    /// Combine two declarations of the same key. `Write` dominates.
    pub fn merge(self, other: Access) -> Access {
        if self == Access::Write || other == Access::Write {
            Access::Write
        } else {
            Access::Read
        }
    }
}

/// Per-call mapping from state key to access mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRules(BTreeMap<String, Access>);

impl KeyRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a read of `key`. An existing write declaration is kept.
    pub fn read(mut self, key: impl Into<String>) -> Self {
        self.declare(key.into(), Access::Read);
        self
    }

    /// Declare a write of `key`.
    pub fn write(mut self, key: impl Into<String>) -> Self {
        self.declare(key.into(), Access::Write);
        self
    }

    pub fn declare(&mut self, key: String, access: Access) {
        let merged = match self.0.get(&key) {
            Some(&existing) => existing.merge(access),
            None => access,
        };
        self.0.insert(key, merged);
    }

    pub fn get(&self, key: &str) -> Option<Access> {
        self.0.get(key).copied()
    }

    /// Whether the call may write `key`.
    pub fn can_write(&self, key: &str) -> bool {
        self.get(key) == Some(Access::Write)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Access)> {
        self.0.iter().map(|(key, &access)| (key.as_str(), access))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Access)> for KeyRules {
    fn from_iter<T: IntoIterator<Item = (K, Access)>>(iter: T) -> Self {
        let mut rules = KeyRules::new();
        for (key, access) in iter {
            rules.declare(key.into(), access);
        }
        rules
    }
}

/// A request to invoke one function of one loaded program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Name the program was loaded under.
    pub program: String,

    /// Function to invoke.
    pub function: String,

    /// State keys the call reads or writes.
    #[serde(default)]
    pub keys: KeyRules,

    /// Caller-defined input, passed through to the engine untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Call {
    pub fn new(program: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            function: function.into(),
            keys: KeyRules::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_keys(mut self, keys: KeyRules) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Input handed to the engine for one invocation.
///
/// `state` holds the current value of every declared key that exists in the
/// shared state; deleted or never-written keys are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Position of the call in the submitted list.
    pub index: usize,
    pub program: String,
    pub function: String,
    pub state: BTreeMap<String, Vec<u8>>,
    pub payload: serde_json::Value,
}

/// What one invocation produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOutput {
    /// Keys written by the call. An empty value deletes the key.
    #[serde(default)]
    pub writes: BTreeMap<String, Vec<u8>>,

    /// Engine-defined fields (status, emitted operations, ...), passed through.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl CallOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.writes.insert(key.into(), value.into());
        self
    }

    /// Mark `key` for deletion.
    pub fn with_tombstone(mut self, key: impl Into<String>) -> Self {
        self.writes.insert(key.into(), Vec::new());
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }
}
