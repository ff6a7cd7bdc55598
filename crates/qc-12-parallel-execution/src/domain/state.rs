//! Partial block state
//!
//! Accumulated writes of a block (or of one group) that have not reached the state
//! store yet.

use super::entities::ExecutionReturnSet;
use super::value_objects::StateKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lookup result against a partial state set
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalValue<'a> {
    Changed(&'a [u8]),
    Deleted,
    Untouched,
}

/// Changes and deletes layered on top of a base state.
///
/// A key is never in both `changes` and `deletes`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStateSet {
    pub changes: BTreeMap<StateKey, Vec<u8>>,
    pub deletes: BTreeSet<StateKey>,
}

impl BlockStateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StateKey) -> LocalValue<'_> {
        if let Some(value) = self.changes.get(key) {
            return LocalValue::Changed(value);
        }
        if self.deletes.contains(key) {
            return LocalValue::Deleted;
        }
        LocalValue::Untouched
    }

    pub fn set(&mut self, key: StateKey, value: Vec<u8>) {
        self.deletes.remove(&key);
        self.changes.insert(key, value);
    }

    pub fn delete(&mut self, key: StateKey) {
        self.changes.remove(&key);
        self.deletes.insert(key);
    }

    /// Apply the diff of a mined transaction. Other statuses leave no trace.
    pub fn apply(&mut self, return_set: &ExecutionReturnSet) {
        if !return_set.is_mined() {
            return;
        }
        for (key, value) in &return_set.state_changes {
            self.set(key.clone(), value.clone());
        }
        for key in &return_set.state_deletes {
            self.delete(key.clone());
        }
    }

    /// Layer `other` on top of `self`.
    pub fn merge(&mut self, other: &BlockStateSet) {
        for (key, value) in &other.changes {
            self.set(key.clone(), value.clone());
        }
        for key in &other.deletes {
            self.delete(key.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deletes.is_empty()
    }
}
