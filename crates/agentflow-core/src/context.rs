use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Mutable key/value scratch space scoped to one workflow execution.
///
/// Only the execution engine writes to a run context, and only after a step
/// has completed; steps receive a snapshot of their declared inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunContext {
    values: HashMap<String, Value>,
}

impl RunContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from an existing map.
    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Stores a value, returning the previous one if present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterates over the keys in arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the context holds no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copies every entry of `other` into this context, overwriting existing keys.
    pub fn extend(&mut self, other: impl IntoIterator<Item = (String, Value)>) {
        self.values.extend(other);
    }

    /// Returns a sub-map restricted to `keys`. Missing keys are left out.
    pub fn select<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> HashMap<String, Value> {
        keys.into_iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Borrows the underlying map.
    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Consumes the context, returning the underlying map.
    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}

impl FromIterator<(String, Value)> for RunContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
