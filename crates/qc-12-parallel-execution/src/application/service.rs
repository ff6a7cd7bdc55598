//! Parallel Execution Service
//!
//! Main service implementing ParallelExecutionApi.
//!
//! Orchestrates one block:
//! 1. Group transactions by declared footprint
//! 2. Run non-parallelizable transactions sequentially
//! 3. Run parallel groups concurrently
//! 4. Merge group results, detecting cross-group conflicts
//! 5. Remark contracts that lied about their footprint
//! 6. Re-execute conflicting transactions sequentially
//! 7. Return results in input order

use super::conflict_identifier::ConflictingTransactionIdentifier;
use super::events::BlockEventHandler;
use super::executor::{execute_sequentially, run_groups};
use super::grouper::{GroupingOutcome, TransactionGrouper};
use super::resource_extractor::ResourceExtractor;
use crate::algorithms::find_conflicting_groups;
use crate::cache::{ContractRemarksCache, ResourceInfoCache};
use crate::config::ParallelExecutionConfig;
use crate::domain::entities::{
    BlockExecutionResult, BlockHeader, ExecutionReturnSet, GroupedTransactions, Transaction,
    TransactionResourceInfo, INVALID_CONTRACT_ADDRESS_ERROR,
};
use crate::domain::errors::{ConfigError, ExecutionError, ExecutionResult};
use crate::domain::invariants::{find_shared_key, invariant_completeness};
use crate::domain::value_objects::{ChainContext, GroupingStrategy, Hash};
use crate::ports::inbound::ParallelExecutionApi;
use crate::ports::outbound::{
    BlockchainStore, ChainLinkLookup, ChainStateProvider, ExecutiveProvider, StateReader,
};
use crate::state::StateOverlay;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound collaborators of the service.
#[derive(Clone)]
pub struct ExecutionPorts {
    pub executives: Arc<dyn ExecutiveProvider>,
    pub states: Arc<dyn ChainStateProvider>,
    pub store: Arc<dyn BlockchainStore>,
    pub links: Arc<dyn ChainLinkLookup>,
}

/// Parallel Execution Service
///
/// Owns the remarks and resource info caches; nothing is global.
pub struct ParallelExecutionService {
    config: ParallelExecutionConfig,
    executives: Arc<dyn ExecutiveProvider>,
    store: Arc<dyn BlockchainStore>,
    extractor: Arc<ResourceExtractor>,
    grouper: TransactionGrouper,
    identifier: ConflictingTransactionIdentifier,
    remarks: Arc<ContractRemarksCache>,
    resource_cache: Arc<ResourceInfoCache>,
}

impl ParallelExecutionService {
    /// Create a new service with default config
    pub fn new(ports: ExecutionPorts) -> Self {
        let remarks = Arc::new(ContractRemarksCache::new(
            ports.links.clone(),
            ParallelExecutionConfig::default().max_fork_walk_depth,
        ));
        Self::assemble(ParallelExecutionConfig::default(), ports, remarks)
    }

    /// Create a new service with custom config
    pub fn with_config(
        config: ParallelExecutionConfig,
        ports: ExecutionPorts,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let remarks = Arc::new(ContractRemarksCache::new(
            ports.links.clone(),
            config.max_fork_walk_depth,
        ));
        Ok(Self::assemble(config, ports, remarks))
    }

    fn assemble(
        config: ParallelExecutionConfig,
        ports: ExecutionPorts,
        remarks: Arc<ContractRemarksCache>,
    ) -> Self {
        let resource_cache = Arc::new(ResourceInfoCache::new());
        let extractor = Arc::new(ResourceExtractor::new(
            ports.executives.clone(),
            ports.states,
            remarks.clone(),
            resource_cache.clone(),
        ));

        Self {
            grouper: TransactionGrouper::new(extractor.clone(), config.clone()),
            identifier: ConflictingTransactionIdentifier::new(
                ports.store.clone(),
                extractor.clone(),
            ),
            config,
            executives: ports.executives,
            store: ports.store,
            extractor,
            remarks,
            resource_cache,
        }
    }

    pub fn config(&self) -> &ParallelExecutionConfig {
        &self.config
    }

    pub fn remarks(&self) -> &Arc<ContractRemarksCache> {
        &self.remarks
    }

    pub fn resource_cache(&self) -> &Arc<ResourceInfoCache> {
        &self.resource_cache
    }

    /// Handler for block pipeline events, sharing this service's caches and the
    /// remark promotion floor. Cheap to create per event.
    pub fn event_handler(&self) -> BlockEventHandler {
        BlockEventHandler::new(
            self.store.clone(),
            self.extractor.clone(),
            self.resource_cache.clone(),
            self.remarks.clone(),
        )
    }

    /// Refuse to run groups that share a declared key.
    fn check_disjoint(
        &self,
        grouped: &GroupedTransactions,
        resource_infos: &HashMap<Hash, TransactionResourceInfo>,
    ) -> ExecutionResult<()> {
        if self.config.grouping_strategy != GroupingStrategy::ResourceAnalysis {
            return Ok(());
        }

        let groups: Vec<Vec<&TransactionResourceInfo>> = grouped
            .parallelizables
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter_map(|tx| resource_infos.get(&tx.id()))
                    .collect()
            })
            .collect();

        match find_shared_key(&groups, self.config.read_sharing) {
            Some((first, second, key)) => {
                error!(first, second, key = %key, "[qc-12] Parallel groups are not disjoint");
                Err(ExecutionError::InvariantViolation { first, second, key })
            }
            None => Ok(()),
        }
    }

    /// Remark the contracts of lying transactions and forget their footprints.
    fn record_wrong_transactions(
        &self,
        header: &BlockHeader,
        wrong: Vec<(Transaction, TransactionResourceInfo)>,
    ) -> Vec<Hash> {
        let ids: Vec<Hash> = wrong.iter().map(|(tx, _)| tx.id()).collect();

        for (transaction, info) in &wrong {
            if let Some(code_hash) = info.contract_hash {
                self.remarks.set_remark(transaction.to, code_hash, header);
            }
        }
        self.resource_cache.invalidate(&ids);

        ids
    }
}

#[async_trait]
impl ParallelExecutionApi for ParallelExecutionService {
    async fn execute_block(
        &self,
        header: &BlockHeader,
        transactions: Vec<Transaction>,
        base_state: Arc<dyn StateReader>,
        cancel: CancellationToken,
    ) -> ExecutionResult<BlockExecutionResult> {
        let chain_context = header.parent_context();
        let input_ids: Vec<Hash> = transactions.iter().map(Transaction::id).collect();
        info!(
            height = header.height,
            transactions = input_ids.len(),
            "[qc-12] Executing block"
        );

        // 1. Group
        let GroupingOutcome {
            grouped,
            resource_infos,
        } = self
            .grouper
            .group_with_infos(&chain_context, transactions, &cancel)
            .await;
        if !invariant_completeness(&grouped, &input_ids) {
            warn!("[qc-12] Grouping does not cover the input exactly once");
        }
        self.check_disjoint(&grouped, &resource_infos)?;

        let mut results: HashMap<Hash, ExecutionReturnSet> = HashMap::new();
        for transaction in &grouped.without_contract {
            let id = transaction.id();
            results.insert(
                id,
                ExecutionReturnSet::failed(id, INVALID_CONTRACT_ADDRESS_ERROR),
            );
        }

        // 2. Non-parallelizable transactions, before any group
        let mut sequential = StateOverlay::new(base_state.clone());
        let (return_sets, mut cancelled) = execute_sequentially(
            self.executives.as_ref(),
            &chain_context,
            &grouped.non_parallelizables,
            &mut sequential,
            &cancel,
        )
        .await;
        results.extend(return_sets.into_iter().map(|set| (set.transaction_id, set)));
        let mut merged = sequential.into_state_set();

        let mut conflicting: Vec<Transaction> = Vec::new();
        let mut rejected: Vec<ExecutionReturnSet> = Vec::new();
        let mut wrong_transactions = Vec::new();

        if !cancelled && !grouped.parallelizables.is_empty() {
            // 3. Parallel groups over base + sequential changes
            let group_base: Arc<dyn StateReader> = Arc::new(StateOverlay::with_state_set(
                base_state.clone(),
                merged.clone(),
            ));
            let outcomes = run_groups(
                self.executives.clone(),
                chain_context,
                group_base,
                grouped.parallelizables.clone(),
                cancel.clone(),
            )
            .await;
            cancelled |= outcomes.iter().any(|outcome| outcome.cancelled);

            // 4. Merge in group order
            let (group_sets, state_sets): (Vec<_>, Vec<_>) = outcomes
                .into_iter()
                .map(|outcome| (outcome.return_sets, outcome.state_set))
                .unzip();
            let flags = find_conflicting_groups(&group_sets);

            let mut accepted: Vec<ExecutionReturnSet> = Vec::new();
            let mut accepted_transactions: Vec<Transaction> = Vec::new();
            let groups = group_sets
                .into_iter()
                .zip(state_sets)
                .zip(flags)
                .zip(grouped.parallelizables);
            for (((sets, state_set), is_conflicting), group) in groups {
                if is_conflicting {
                    let executed: HashSet<Hash> = sets.iter().map(|s| s.transaction_id).collect();
                    conflicting.extend(group.into_iter().filter(|tx| executed.contains(&tx.id())));
                    rejected.extend(sets);
                } else {
                    merged.merge(&state_set);
                    accepted.extend(sets);
                    accepted_transactions.extend(group);
                }
            }

            // 5. Find the liars
            if !rejected.is_empty() {
                warn!(
                    conflicting = rejected.len(),
                    "[qc-12] Parallel groups conflicted"
                );
                // Block transactions resolve locally; the store may not index them yet
                accepted_transactions.extend(conflicting.iter().cloned());
                let wrong = self
                    .identifier
                    .identify_wrong_resources(
                        &chain_context,
                        &accepted_transactions,
                        &accepted,
                        &rejected,
                    )
                    .await?;
                wrong_transactions = self.record_wrong_transactions(header, wrong);
            }
            results.extend(accepted.into_iter().map(|set| (set.transaction_id, set)));
        }

        let position: HashMap<Hash, usize> = input_ids
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();
        let mut conflicting_transactions: Vec<Hash> =
            rejected.iter().map(|set| set.transaction_id).collect();
        conflicting_transactions.sort_by_key(|id| position.get(id).copied());

        // 6. Conflicting transactions
        if self.config.reexecute_conflicts && !cancelled {
            conflicting.sort_by_key(|tx| position.get(&tx.id()).copied());
            let mut overlay = StateOverlay::with_state_set(base_state, merged);
            let (return_sets, stopped) = execute_sequentially(
                self.executives.as_ref(),
                &chain_context,
                &conflicting,
                &mut overlay,
                &cancel,
            )
            .await;
            cancelled |= stopped;
            debug!(
                reexecuted = return_sets.len(),
                "[qc-12] Re-executed conflicting transactions"
            );
            results.extend(return_sets.into_iter().map(|set| (set.transaction_id, set)));
            merged = overlay.into_state_set();
        } else {
            results.extend(
                rejected
                    .into_iter()
                    .map(|set| (set.transaction_id, set.into_conflict())),
            );
        }

        // 7. Input order
        let return_sets: Vec<ExecutionReturnSet> = input_ids
            .iter()
            .filter_map(|id| results.remove(id))
            .collect();

        info!(
            height = header.height,
            executed = return_sets.len(),
            conflicts = conflicting_transactions.len(),
            wrong = wrong_transactions.len(),
            cancelled,
            "[qc-12] Block executed"
        );

        Ok(BlockExecutionResult {
            return_sets,
            state_set: merged,
            conflicting_transactions,
            wrong_transactions,
            cancelled,
        })
    }

    async fn group_transactions(
        &self,
        chain_context: &ChainContext,
        transactions: Vec<Transaction>,
    ) -> GroupedTransactions {
        self.grouper
            .group(chain_context, transactions, &CancellationToken::new())
            .await
    }

    async fn get_resource_info(
        &self,
        chain_context: &ChainContext,
        transaction: &Transaction,
    ) -> TransactionResourceInfo {
        self.extractor
            .get_cached_resource_info(chain_context, transaction)
            .await
    }
}
