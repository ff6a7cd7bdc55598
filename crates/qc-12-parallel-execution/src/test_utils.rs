//! Test utilities for parallel execution.
//!
//! In-memory implementations of the outbound ports for deterministic testing.
//! Enable with the `test-utils` feature flag.
//!
//! The test contract understands two methods:
//! - any business method: params are a bincode `TestCall`; every read key is read,
//!   every write key gets its previous value with `tag` appended (order sensitive).
//! - `GetResourceInfo`: answers with the `declared` footprint of the wrapped call,
//!   or misbehaves according to the contract's `ResourceMode`.

use crate::domain::entities::{
    Block, BlockHeader, ChainSnapshot, ResourceDeclaration, Transaction, RESOURCE_INFO_METHOD,
};
use crate::domain::errors::{ExecutiveError, StateError, StoreError};
use crate::domain::state::BlockStateSet;
use crate::domain::value_objects::{Address, ChainContext, Hash, StateKey};
use crate::ports::outbound::{
    BlockchainStore, ChainLinkLookup, ChainStateProvider, Executive, ExecutiveProvider,
    StateReader,
};
use crate::state::TransactionState;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Committed key/value state shared by clones.
#[derive(Clone, Default)]
pub struct MemoryState {
    entries: Arc<RwLock<BTreeMap<StateKey, Vec<u8>>>>,
}

impl MemoryState {
    pub fn from_pairs(pairs: Vec<(StateKey, Vec<u8>)>) -> Self {
        let state = Self::default();
        state.entries.write().extend(pairs);
        state
    }

    /// Write a block's diff into committed state.
    pub fn commit(&self, state_set: &BlockStateSet) {
        let mut entries = self.entries.write();
        for (key, value) in &state_set.changes {
            entries.insert(key.clone(), value.clone());
        }
        for key in &state_set.deletes {
            entries.remove(key);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<StateKey, Vec<u8>> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl StateReader for MemoryState {
    async fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.entries.read().get(key).cloned())
    }
}

impl ChainStateProvider for MemoryState {
    fn state_at(&self, _chain_context: &ChainContext) -> Arc<dyn StateReader> {
        Arc::new(self.clone())
    }
}

/// Params of a business call on the test contract.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TestCall {
    /// Footprint answered by `GetResourceInfo`
    pub declared: ResourceDeclaration,
    pub reads: Vec<StateKey>,
    pub writes: Vec<StateKey>,
    /// Appended to every written value
    pub tag: u8,
    pub fail: bool,
}

impl TestCall {
    /// Call that declares exactly what it touches.
    pub fn honest(reads: &[&str], writes: &[&str], tag: u8) -> Self {
        let reads: Vec<StateKey> = reads.iter().map(|k| StateKey::from(*k)).collect();
        let writes: Vec<StateKey> = writes.iter().map(|k| StateKey::from(*k)).collect();
        Self {
            declared: ResourceDeclaration {
                read_paths: reads.clone(),
                write_paths: writes.clone(),
                non_parallelizable: false,
            },
            reads,
            writes,
            tag,
            fail: false,
        }
    }

    /// Call that declares `declared_writes` but actually writes `actual_writes`.
    pub fn lying(declared_writes: &[&str], actual_writes: &[&str], tag: u8) -> Self {
        let mut call = Self::honest(&[], declared_writes, tag);
        call.writes = actual_writes.iter().map(|k| StateKey::from(*k)).collect();
        call
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }
}

/// How the test contract answers `GetResourceInfo`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceMode {
    Declares,
    NotImplemented,
    Throws,
    Garbage,
    DeclaresNonParallelizable,
}

#[derive(Clone, Copy, Debug)]
struct TestContract {
    code_hash: Hash,
    mode: ResourceMode,
}

/// Executive running the test contract.
pub struct TestExecutive {
    contract: TestContract,
}

impl TestExecutive {
    fn declare(&self, transaction: &Transaction) -> Result<Vec<u8>, ExecutiveError> {
        match self.contract.mode {
            ResourceMode::NotImplemented => Err(ExecutiveError::MethodNotFound {
                method: RESOURCE_INFO_METHOD.to_string(),
            }),
            ResourceMode::Throws => Err(ExecutiveError::Reverted("resource info panicked".into())),
            ResourceMode::Garbage => Ok(vec![0xff, 0x00, 0x13]),
            ResourceMode::DeclaresNonParallelizable => Ok(ResourceDeclaration {
                non_parallelizable: true,
                ..Default::default()
            }
            .encode()),
            ResourceMode::Declares => {
                let inner: Transaction = bincode::deserialize(&transaction.params)
                    .map_err(|e| ExecutiveError::Reverted(e.to_string()))?;
                let call: TestCall = bincode::deserialize(&inner.params)
                    .map_err(|e| ExecutiveError::Reverted(e.to_string()))?;
                Ok(call.declared.encode())
            }
        }
    }
}

#[async_trait]
impl Executive for TestExecutive {
    fn code_hash(&self) -> Hash {
        self.contract.code_hash
    }

    async fn execute(
        &mut self,
        transaction: &Transaction,
        state: &mut TransactionState<'_>,
    ) -> Result<Vec<u8>, ExecutiveError> {
        if transaction.method_name == RESOURCE_INFO_METHOD {
            return self.declare(transaction);
        }

        let call: TestCall = bincode::deserialize(&transaction.params)
            .map_err(|e| ExecutiveError::Reverted(e.to_string()))?;
        for key in &call.reads {
            state.get(key).await?;
        }
        for key in &call.writes {
            let mut value = state.get(key).await?.unwrap_or_default();
            value.push(call.tag);
            state.set(key.clone(), value);
        }
        if call.fail {
            return Err(ExecutiveError::Reverted("requested failure".into()));
        }
        Ok(vec![call.tag])
    }
}

/// Executive pool over registered test contracts.
#[derive(Default)]
pub struct TestExecutiveProvider {
    contracts: RwLock<HashMap<Address, TestContract>>,
    deploying: RwLock<HashSet<Address>>,
    checked_out: AtomicUsize,
    returned: AtomicUsize,
}

impl TestExecutiveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: Address, code_hash: Hash, mode: ResourceMode) {
        self.contracts
            .write()
            .insert(address, TestContract { code_hash, mode });
    }

    /// Replace the code of a registered contract.
    pub fn upgrade(&self, address: Address, code_hash: Hash) {
        if let Some(contract) = self.contracts.write().get_mut(&address) {
            contract.code_hash = code_hash;
        }
    }

    pub fn set_deploying(&self, address: Address, deploying: bool) {
        let mut set = self.deploying.write();
        if deploying {
            set.insert(address);
        } else {
            set.remove(&address);
        }
    }

    /// Executives currently checked out.
    pub fn outstanding(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst) - self.returned.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutiveProvider for TestExecutiveProvider {
    async fn get_executive(
        &self,
        _chain_context: &ChainContext,
        address: Address,
    ) -> Result<Box<dyn Executive>, ExecutiveError> {
        let contract = self
            .contracts
            .read()
            .get(&address)
            .copied()
            .ok_or(ExecutiveError::NotFound { address })?;
        self.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestExecutive { contract }))
    }

    async fn return_executive(&self, _address: Address, _executive: Box<dyn Executive>) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }

    async fn is_deploying(&self, _chain_context: &ChainContext, address: Address) -> bool {
        self.deploying.read().contains(&address)
    }

    async fn get_code_hash(
        &self,
        _chain_context: &ChainContext,
        address: Address,
    ) -> Result<Hash, ExecutiveError> {
        self.contracts
            .read()
            .get(&address)
            .map(|contract| contract.code_hash)
            .ok_or(ExecutiveError::NotFound { address })
    }
}

#[derive(Default)]
struct ChainData {
    blocks: HashMap<Hash, Block>,
    transactions: HashMap<Hash, Transaction>,
    best: Option<BlockHeader>,
    lib: Option<BlockHeader>,
}

/// Block tree plus transaction index.
#[derive(Default)]
pub struct InMemoryChain {
    data: RwLock<ChainData>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Genesis block with the given hash at height 0.
    pub fn with_genesis(hash: Hash) -> Self {
        let chain = Self::new();
        let header = BlockHeader::new(hash, Hash::zero(), 0);
        chain.add_block(header, vec![]);
        chain.set_best(hash);
        chain.set_lib(hash);
        chain
    }

    pub fn add_block(&self, header: BlockHeader, transactions: Vec<Transaction>) -> Block {
        let block = Block {
            header,
            transaction_ids: transactions.iter().map(Transaction::id).collect(),
        };
        let mut data = self.data.write();
        for tx in transactions {
            data.transactions.insert(tx.id(), tx);
        }
        data.blocks.insert(header.block_hash, block.clone());
        block
    }

    /// Index transactions without a block (e.g. accepted into the pool).
    pub fn add_transactions(&self, transactions: Vec<Transaction>) {
        let mut data = self.data.write();
        for tx in transactions {
            data.transactions.insert(tx.id(), tx);
        }
    }

    pub fn set_best(&self, hash: Hash) {
        let mut data = self.data.write();
        data.best = data.blocks.get(&hash).map(|b| b.header);
    }

    pub fn set_lib(&self, hash: Hash) {
        let mut data = self.data.write();
        data.lib = data.blocks.get(&hash).map(|b| b.header);
    }
}

#[async_trait]
impl BlockchainStore for InMemoryChain {
    async fn get_transactions_by_id(&self, ids: &[Hash]) -> Result<Vec<Transaction>, StoreError> {
        let data = self.data.read();
        ids.iter()
            .map(|id| {
                data.transactions
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::TransactionNotFound(*id))
            })
            .collect()
    }

    async fn get_chain(&self) -> Result<ChainSnapshot, StoreError> {
        let data = self.data.read();
        let (Some(best), Some(lib)) = (data.best, data.lib) else {
            return Err(StoreError::Backend("chain not initialised".into()));
        };
        Ok(ChainSnapshot {
            best_hash: best.block_hash,
            best_height: best.height,
            lib_hash: lib.block_hash,
            lib_height: lib.height,
        })
    }

    async fn get_block_by_hash(&self, hash: Hash) -> Result<Option<Block>, StoreError> {
        Ok(self.data.read().blocks.get(&hash).cloned())
    }
}

#[async_trait]
impl ChainLinkLookup for InMemoryChain {
    async fn get_parent_link(&self, block_hash: Hash) -> Option<Hash> {
        self.data
            .read()
            .blocks
            .get(&block_hash)
            .filter(|block| block.header.height > 0)
            .map(|block| block.header.previous_block_hash)
    }
}
