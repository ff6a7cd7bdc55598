//! Core entities for Parallel Execution
//!
//! Transactions, declared and actual resource usage, grouping output and the
//! contract remarks kept by the fork-aware cache.

use super::value_objects::{
    Address, BlockIndex, ChainContext, ExecutionStatus, Hash, ParallelType, StateKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Method every contract may implement to declare the state keys a call will touch.
pub const RESOURCE_INFO_METHOD: &str = "GetResourceInfo";

/// Error attached to transactions whose target contract cannot be resolved.
pub const INVALID_CONTRACT_ADDRESS_ERROR: &str = "Invalid contract address";

/// A transaction as seen by the execution core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    pub method_name: String,
    pub params: Vec<u8>,
    pub ref_block_number: u64,
    pub signature: Vec<u8>,
}

impl Transaction {
    pub fn new(
        from: Address,
        to: Address,
        method_name: impl Into<String>,
        params: Vec<u8>,
    ) -> Self {
        Self {
            from,
            to,
            method_name: method_name.into(),
            params,
            ref_block_number: 0,
            signature: Vec::new(),
        }
    }

    pub fn with_ref_block_number(mut self, ref_block_number: u64) -> Self {
        self.ref_block_number = ref_block_number;
        self
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// Transaction id: SHA-256 over the length-prefixed field encoding.
    pub fn id(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.from.as_bytes());
        hasher.update(self.to.as_bytes());
        hasher.update((self.method_name.len() as u32).to_be_bytes());
        hasher.update(self.method_name.as_bytes());
        hasher.update((self.params.len() as u32).to_be_bytes());
        hasher.update(&self.params);
        hasher.update(self.ref_block_number.to_be_bytes());
        hasher.update((self.signature.len() as u32).to_be_bytes());
        hasher.update(&self.signature);
        Hash::from_slice(&hasher.finalize())
    }
}

/// Structured reply of the resource declaration entry point.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub read_paths: Vec<StateKey>,
    pub write_paths: Vec<StateKey>,
    pub non_parallelizable: bool,
}

impl ResourceDeclaration {
    pub fn encode(&self) -> Vec<u8> {
        // Serializing plain vectors and a bool cannot fail.
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Declared footprint of one transaction, produced before execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResourceInfo {
    pub transaction_id: Hash,
    pub read_paths: BTreeSet<StateKey>,
    pub write_paths: BTreeSet<StateKey>,
    pub parallel_type: ParallelType,
    /// Code hash of the executive that answered, when one was resolved
    pub contract_hash: Option<Hash>,
    /// Verdict came from a contract remark rather than from the contract itself
    pub is_nonparallel_contract_code: bool,
}

impl TransactionResourceInfo {
    pub fn parallelizable(
        transaction_id: Hash,
        read_paths: impl IntoIterator<Item = StateKey>,
        write_paths: impl IntoIterator<Item = StateKey>,
    ) -> Self {
        Self {
            transaction_id,
            read_paths: read_paths.into_iter().collect(),
            write_paths: write_paths.into_iter().collect(),
            parallel_type: ParallelType::Parallelizable,
            contract_hash: None,
            is_nonparallel_contract_code: false,
        }
    }

    pub fn non_parallelizable(transaction_id: Hash) -> Self {
        Self {
            transaction_id,
            read_paths: BTreeSet::new(),
            write_paths: BTreeSet::new(),
            parallel_type: ParallelType::NonParallelizable,
            contract_hash: None,
            is_nonparallel_contract_code: false,
        }
    }

    pub fn invalid_contract_address(transaction_id: Hash) -> Self {
        Self {
            parallel_type: ParallelType::InvalidContractAddress,
            ..Self::non_parallelizable(transaction_id)
        }
    }

    pub fn with_contract_hash(mut self, contract_hash: Hash) -> Self {
        self.contract_hash = Some(contract_hash);
        self
    }

    /// All declared keys, read or written.
    pub fn footprint(&self) -> BTreeSet<&StateKey> {
        self.read_paths.iter().chain(self.write_paths.iter()).collect()
    }

    pub fn declares(&self, key: &StateKey) -> bool {
        self.read_paths.contains(key) || self.write_paths.contains(key)
    }
}

/// Actual outcome of one executed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReturnSet {
    pub transaction_id: Hash,
    pub status: ExecutionStatus,
    /// Every key touched; `true` when the key was written
    pub state_accesses: BTreeMap<StateKey, bool>,
    pub state_changes: BTreeMap<StateKey, Vec<u8>>,
    pub state_deletes: BTreeSet<StateKey>,
    pub return_value: Vec<u8>,
    pub error: Option<String>,
}

impl ExecutionReturnSet {
    pub fn mined(transaction_id: Hash) -> Self {
        Self {
            transaction_id,
            status: ExecutionStatus::Mined,
            state_accesses: BTreeMap::new(),
            state_changes: BTreeMap::new(),
            state_deletes: BTreeSet::new(),
            return_value: Vec::new(),
            error: None,
        }
    }

    pub fn failed(transaction_id: Hash, error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error: Some(error.into()),
            ..Self::mined(transaction_id)
        }
    }

    pub fn is_mined(&self) -> bool {
        self.status == ExecutionStatus::Mined
    }

    pub fn touched_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.state_accesses.keys()
    }

    pub fn written_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.state_accesses
            .iter()
            .filter(|(_, written)| **written)
            .map(|(key, _)| key)
    }

    pub fn read_only_keys(&self) -> impl Iterator<Item = &StateKey> {
        self.state_accesses
            .iter()
            .filter(|(_, written)| !**written)
            .map(|(key, _)| key)
    }

    /// Mark as excluded from a parallel merge, dropping its state diff.
    pub fn into_conflict(mut self) -> Self {
        self.status = ExecutionStatus::Conflict;
        self.error = Some("Parallel conflict".to_string());
        self.state_changes.clear();
        self.state_deletes.clear();
        self
    }
}

/// Partition of one block's transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupedTransactions {
    pub non_parallelizables: Vec<Transaction>,
    /// Disjoint groups, each kept in input order
    pub parallelizables: Vec<Vec<Transaction>>,
    pub without_contract: Vec<Transaction>,
}

impl GroupedTransactions {
    pub fn total(&self) -> usize {
        self.non_parallelizables.len()
            + self.without_contract.len()
            + self.parallelizables.iter().map(Vec::len).sum::<usize>()
    }
}

/// Verdict that a contract code version is unsafe to parallelize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRemark {
    pub contract_address: Address,
    pub code_hash: Hash,
    pub non_parallelizable: bool,
    /// Set while the remark is fork-pending
    pub block_index: Option<BlockIndex>,
}

impl ContractRemark {
    pub fn non_parallelizable_at(
        contract_address: Address,
        code_hash: Hash,
        block_index: BlockIndex,
    ) -> Self {
        Self {
            contract_address,
            code_hash,
            non_parallelizable: true,
            block_index: Some(block_index),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.block_index.is_none()
    }
}

/// Header of the block being executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub block_hash: Hash,
    pub previous_block_hash: Hash,
    pub height: u64,
}

impl BlockHeader {
    pub fn new(block_hash: Hash, previous_block_hash: Hash, height: u64) -> Self {
        Self {
            block_hash,
            previous_block_hash,
            height,
        }
    }

    pub fn block_index(&self) -> BlockIndex {
        BlockIndex::new(self.block_hash, self.height)
    }

    /// Context the block's transactions execute against: its parent.
    pub fn parent_context(&self) -> ChainContext {
        ChainContext::new(self.previous_block_hash, self.height.saturating_sub(1))
    }
}

/// A block known to the blockchain store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transaction_ids: Vec<Hash>,
}

/// Best chain and last irreversible block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub best_hash: Hash,
    pub best_height: u64,
    pub lib_hash: Hash,
    pub lib_height: u64,
}

impl ChainSnapshot {
    pub fn best_context(&self) -> ChainContext {
        ChainContext::new(self.best_hash, self.best_height)
    }
}

/// Result of executing one block's transaction list.
#[derive(Clone, Debug, Default)]
pub struct BlockExecutionResult {
    /// One entry per executed transaction, in input order
    pub return_sets: Vec<ExecutionReturnSet>,
    /// Merged state diff of the whole pass
    pub state_set: super::state::BlockStateSet,
    /// Transactions whose groups lost the parallel merge
    pub conflicting_transactions: Vec<Hash>,
    /// Transactions whose actual access escaped their declared footprint
    pub wrong_transactions: Vec<Hash>,
    pub cancelled: bool,
}
