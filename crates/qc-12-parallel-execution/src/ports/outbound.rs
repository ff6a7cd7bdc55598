//! Outbound Ports (Driven Ports / SPI)
//!
//! Collaborators the execution core consumes: the contract executive pool, the
//! state store, the blockchain store and the chain-link lookup used by the
//! fork-aware remarks cache.

use crate::domain::entities::{Block, ChainSnapshot, Transaction};
use crate::domain::errors::{ExecutiveError, StateError, StoreError};
use crate::domain::value_objects::{Address, ChainContext, Hash, StateKey};
use crate::state::TransactionState;
use async_trait::async_trait;
use std::sync::Arc;

/// Read access to contract state.
///
/// Implemented by the state store adapter and by the in-block overlays.
#[async_trait]
pub trait StateReader: Send + Sync {
    /// Current value of `key`, `None` if it was never written or was deleted.
    async fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StateError>;
}

/// Committed state as of a chain position.
pub trait ChainStateProvider: Send + Sync {
    /// Read view of the state after `chain_context`'s block was applied.
    fn state_at(&self, chain_context: &ChainContext) -> Arc<dyn StateReader>;
}

/// One-shot contract interpreter instance, checked out of a pool.
#[async_trait]
pub trait Executive: Send + Sync {
    /// Hash of the contract code this executive runs.
    fn code_hash(&self) -> Hash;

    /// Run one transaction against `state`.
    ///
    /// Reads and writes go through `state`, which records the actual access set.
    /// Returns the call's return value.
    async fn execute(
        &mut self,
        transaction: &Transaction,
        state: &mut TransactionState<'_>,
    ) -> Result<Vec<u8>, ExecutiveError>;
}

/// Pool of executives keyed by contract address.
#[async_trait]
pub trait ExecutiveProvider: Send + Sync {
    /// Check out the executive of `address` as of `chain_context`.
    async fn get_executive(
        &self,
        chain_context: &ChainContext,
        address: Address,
    ) -> Result<Box<dyn Executive>, ExecutiveError>;

    /// Give a checked-out executive back to the pool.
    async fn return_executive(&self, address: Address, executive: Box<dyn Executive>);

    /// Whether `address` is being deployed or upgraded at `chain_context`.
    async fn is_deploying(&self, _chain_context: &ChainContext, _address: Address) -> bool {
        false
    }

    /// Code hash `address` runs at `chain_context`.
    ///
    /// Pools that index code hashes should override this; the default checks an
    /// executive out and back in.
    async fn get_code_hash(
        &self,
        chain_context: &ChainContext,
        address: Address,
    ) -> Result<Hash, ExecutiveError> {
        let executive = self.get_executive(chain_context, address).await?;
        let code_hash = executive.code_hash();
        self.return_executive(address, executive).await;
        Ok(code_hash)
    }
}

/// Access to stored blocks and transactions.
#[async_trait]
pub trait BlockchainStore: Send + Sync {
    /// Transactions for `ids`, in the same order. Unknown ids are an error.
    async fn get_transactions_by_id(&self, ids: &[Hash]) -> Result<Vec<Transaction>, StoreError>;

    async fn get_chain(&self) -> Result<ChainSnapshot, StoreError>;

    async fn get_block_by_hash(&self, hash: Hash) -> Result<Option<Block>, StoreError>;
}

/// Parent lookup used to walk a branch backwards.
#[async_trait]
pub trait ChainLinkLookup: Send + Sync {
    /// Parent hash of `block_hash`, `None` when the block is unknown.
    async fn get_parent_link(&self, block_hash: Hash) -> Option<Hash>;
}
