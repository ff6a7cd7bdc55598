//! # State Views
//!
//! - `TransactionState`: what one transaction sees, recording every key it reads
//!   or writes. The recorded set is the *actual* access set compared against the
//!   declared footprint after execution.
//! - `StateOverlay`: copy-on-write layer used by a group (or by the sequential
//!   passes) on top of committed state.

use crate::domain::entities::ExecutionReturnSet;
use crate::domain::errors::StateError;
use crate::domain::state::{BlockStateSet, LocalValue};
use crate::domain::value_objects::{Hash, StateKey};
use crate::ports::outbound::StateReader;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Per-transaction view with access recording.
pub struct TransactionState<'a> {
    base: &'a dyn StateReader,
    reads: BTreeSet<StateKey>,
    /// `None` marks a delete
    writes: BTreeMap<StateKey, Option<Vec<u8>>>,
}

impl<'a> TransactionState<'a> {
    pub fn new(base: &'a dyn StateReader) -> Self {
        Self {
            base,
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
        }
    }

    pub async fn get(&mut self, key: &StateKey) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.reads.insert(key.clone());
        self.base.get_state(key).await
    }

    pub fn set(&mut self, key: StateKey, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: StateKey) {
        self.writes.insert(key, None);
    }

    pub fn read_keys(&self) -> &BTreeSet<StateKey> {
        &self.reads
    }

    pub fn written_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.writes.keys()
    }

    /// Successful outcome: accesses plus the state diff.
    pub fn into_mined(self, transaction_id: Hash, return_value: Vec<u8>) -> ExecutionReturnSet {
        let mut set = ExecutionReturnSet::mined(transaction_id);
        set.return_value = return_value;
        for key in self.reads {
            set.state_accesses.insert(key, false);
        }
        for (key, value) in self.writes {
            set.state_accesses.insert(key.clone(), true);
            match value {
                Some(value) => {
                    set.state_changes.insert(key, value);
                }
                None => {
                    set.state_deletes.insert(key);
                }
            }
        }
        set
    }

    /// Failed outcome: writes are discarded, reads are still reported.
    pub fn into_failed(self, transaction_id: Hash, error: impl Into<String>) -> ExecutionReturnSet {
        let mut set = ExecutionReturnSet::failed(transaction_id, error);
        for key in self.reads {
            set.state_accesses.insert(key, false);
        }
        set
    }
}

/// Copy-on-write layer over committed state.
pub struct StateOverlay {
    base: Arc<dyn StateReader>,
    local: BlockStateSet,
}

impl StateOverlay {
    pub fn new(base: Arc<dyn StateReader>) -> Self {
        Self::with_state_set(base, BlockStateSet::new())
    }

    pub fn with_state_set(base: Arc<dyn StateReader>, local: BlockStateSet) -> Self {
        Self { base, local }
    }

    /// Fold a transaction's diff into the layer.
    pub fn apply(&mut self, return_set: &ExecutionReturnSet) {
        self.local.apply(return_set);
    }

    pub fn merge(&mut self, state_set: &BlockStateSet) {
        self.local.merge(state_set);
    }

    pub fn state_set(&self) -> &BlockStateSet {
        &self.local
    }

    pub fn into_state_set(self) -> BlockStateSet {
        self.local
    }
}

#[async_trait]
impl StateReader for StateOverlay {
    async fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StateError> {
        match self.local.get(key) {
            LocalValue::Changed(value) => Ok(Some(value.to_vec())),
            LocalValue::Deleted => Ok(None),
            LocalValue::Untouched => self.base.get_state(key).await,
        }
    }
}
