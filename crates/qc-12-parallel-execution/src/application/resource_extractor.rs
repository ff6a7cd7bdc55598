//! Resource Extractor
//!
//! Obtains the declared footprint of a transaction by calling the target
//! contract's `GetResourceInfo` entry point read-only. Every failure collapses to
//! a conservative verdict; nothing here fails the caller.

use crate::cache::{ContractRemarksCache, ResourceInfoCache};
use crate::domain::entities::{
    ResourceDeclaration, Transaction, TransactionResourceInfo, RESOURCE_INFO_METHOD,
};
use crate::domain::errors::ExtractionError;
use crate::domain::value_objects::{ChainContext, Hash};
use crate::ports::outbound::{ChainStateProvider, Executive, ExecutiveProvider};
use crate::state::TransactionState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct ResourceExtractor {
    executives: Arc<dyn ExecutiveProvider>,
    states: Arc<dyn ChainStateProvider>,
    remarks: Arc<ContractRemarksCache>,
    cache: Arc<ResourceInfoCache>,
}

impl ResourceExtractor {
    pub fn new(
        executives: Arc<dyn ExecutiveProvider>,
        states: Arc<dyn ChainStateProvider>,
        remarks: Arc<ContractRemarksCache>,
        cache: Arc<ResourceInfoCache>,
    ) -> Self {
        Self {
            executives,
            states,
            remarks,
            cache,
        }
    }

    /// Declared footprint of `transaction` as of `chain_context`, bypassing the cache.
    pub async fn get_resource_info(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
    ) -> TransactionResourceInfo {
        let transaction_id = transaction.id();

        match self.try_get_resource_info(chain_context, transaction).await {
            Ok(info) => info,
            Err(ExtractionError::ContractNotFound { address }) => {
                debug!(tx = ?transaction_id, address = ?address, "[qc-12] Contract not resolvable");
                TransactionResourceInfo::invalid_contract_address(transaction_id)
            }
            Err(ExtractionError::NonParallelContractCode { code_hash }) => {
                let mut info = TransactionResourceInfo::non_parallelizable(transaction_id)
                    .with_contract_hash(code_hash);
                info.is_nonparallel_contract_code = true;
                info
            }
            Err(ExtractionError::DeclaredNonParallelizable { code_hash }) => {
                TransactionResourceInfo::non_parallelizable(transaction_id)
                    .with_contract_hash(code_hash)
            }
            Err(err) => {
                warn!(
                    tx = ?transaction_id,
                    error = %err,
                    "[qc-12] Falling back to sequential execution"
                );
                TransactionResourceInfo::non_parallelizable(transaction_id)
            }
        }
    }

    /// Declared footprint, served from the resource info cache when the cached
    /// entry still holds at `chain_context`.
    ///
    /// A hit is stale once the contract is being redeployed, runs different code,
    /// or carries a non-parallel remark on this branch; stale entries are dropped
    /// and recomputed.
    pub async fn get_cached_resource_info(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
    ) -> TransactionResourceInfo {
        let transaction_id = transaction.id();

        if let Some(info) = self.cache.get(chain_context, &transaction_id) {
            if self.is_still_valid(chain_context, transaction, &info).await {
                return info;
            }
            debug!(tx = ?transaction_id, "[qc-12] Cached resource info is stale");
            self.cache.invalidate(&[transaction_id]);
        }

        let info = self.get_resource_info(chain_context, transaction).await;
        self.cache.insert(chain_context, info.clone());
        info
    }

    /// Batch form of `get_cached_resource_info`, in input order.
    ///
    /// Once `cancel` fires, remaining transactions are not introspected and are
    /// reported `NonParallelizable`.
    pub async fn get_resource_infos(
        &self,
        chain_context: &ChainContext,
        transactions: &[Transaction],
        cancel: &CancellationToken,
    ) -> Vec<TransactionResourceInfo> {
        let mut infos = Vec::with_capacity(transactions.len());

        for transaction in transactions {
            if cancel.is_cancelled() {
                infos.push(TransactionResourceInfo::non_parallelizable(transaction.id()));
                continue;
            }
            infos.push(self.get_cached_resource_info(chain_context, transaction).await);
        }

        infos
    }

    async fn try_get_resource_info(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
    ) -> Result<TransactionResourceInfo, ExtractionError> {
        let address = transaction.to;

        if self.executives.is_deploying(chain_context, address).await {
            return Err(ExtractionError::ContractDeploying { address });
        }

        let mut executive = self
            .executives
            .get_executive(chain_context, address)
            .await
            .map_err(|_| ExtractionError::ContractNotFound { address })?;

        let result = self
            .declare(chain_context, transaction, executive.as_mut())
            .await;
        self.executives.return_executive(address, executive).await;
        result
    }

    async fn declare(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
        executive: &mut dyn Executive,
    ) -> Result<TransactionResourceInfo, ExtractionError> {
        let code_hash = executive.code_hash();
        if self.is_marked_non_parallel(chain_context, transaction, code_hash).await {
            return Err(ExtractionError::NonParallelContractCode { code_hash });
        }

        let params = bincode::serialize(transaction)
            .map_err(|e| ExtractionError::Unparsable(e.to_string()))?;
        let call = Transaction::new(transaction.from, transaction.to, RESOURCE_INFO_METHOD, params);

        // Read-only: the view's writes are dropped with it
        let state = self.states.state_at(chain_context);
        let mut view = TransactionState::new(state.as_ref());
        let reply = executive.execute(&call, &mut view).await?;

        let declaration = ResourceDeclaration::decode(&reply)
            .map_err(|e| ExtractionError::Unparsable(e.to_string()))?;
        if declaration.non_parallelizable {
            return Err(ExtractionError::DeclaredNonParallelizable { code_hash });
        }

        Ok(TransactionResourceInfo::parallelizable(
            transaction.id(),
            declaration.read_paths,
            declaration.write_paths,
        )
        .with_contract_hash(code_hash))
    }

    async fn is_still_valid(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
        info: &TransactionResourceInfo,
    ) -> bool {
        let Some(cached_hash) = info.contract_hash else {
            return true;
        };
        let address = transaction.to;
        if self.executives.is_deploying(chain_context, address).await {
            return false;
        }
        match self.executives.get_code_hash(chain_context, address).await {
            Ok(code_hash) if code_hash == cached_hash => {
                !self.is_marked_non_parallel(chain_context, transaction, code_hash).await
            }
            _ => false,
        }
    }

    async fn is_marked_non_parallel(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
        code_hash: Hash,
    ) -> bool {
        self.remarks
            .get_remark(chain_context, transaction.to)
            .await
            .is_some_and(|remark| remark.non_parallelizable && remark.code_hash == code_hash)
    }
}
