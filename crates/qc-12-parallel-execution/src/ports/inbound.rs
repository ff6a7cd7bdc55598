//! Inbound Ports (Driving Ports / API)

use crate::domain::entities::{
    BlockExecutionResult, BlockHeader, GroupedTransactions, Transaction, TransactionResourceInfo,
};
use crate::domain::errors::ExecutionResult;
use crate::domain::value_objects::ChainContext;
use crate::ports::outbound::StateReader;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Primary Parallel Execution API
#[async_trait]
pub trait ParallelExecutionApi: Send + Sync {
    /// Execute one block's transactions, in parallel where their declared
    /// footprints allow it.
    ///
    /// `base_state` is the committed state of the parent block. Return sets come
    /// back in input order. When `cancel` fires, no new transaction is started and
    /// the partial result is returned with `cancelled` set.
    async fn execute_block(
        &self,
        header: &BlockHeader,
        transactions: Vec<Transaction>,
        base_state: Arc<dyn StateReader>,
        cancel: CancellationToken,
    ) -> ExecutionResult<BlockExecutionResult>;

    /// Partition transactions without executing them.
    async fn group_transactions(
        &self,
        chain_context: &ChainContext,
        transactions: Vec<Transaction>,
    ) -> GroupedTransactions;

    /// Declared footprint of one transaction.
    async fn get_resource_info(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
    ) -> TransactionResourceInfo;
}
