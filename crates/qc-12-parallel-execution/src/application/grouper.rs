//! Transaction Grouper
//!
//! Splits one block's transaction list into non-parallelizable transactions,
//! disjoint parallel groups and transactions without a resolvable contract.

use super::resource_extractor::ResourceExtractor;
use crate::algorithms::{balance_groups, group_by_keys, group_by_sender};
use crate::config::ParallelExecutionConfig;
use crate::domain::entities::{GroupedTransactions, Transaction, TransactionResourceInfo};
use crate::domain::value_objects::{ChainContext, GroupingStrategy, Hash, ParallelType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Grouping plus the declared footprints it was computed from.
#[derive(Clone, Debug, Default)]
pub struct GroupingOutcome {
    pub grouped: GroupedTransactions,
    pub resource_infos: HashMap<Hash, TransactionResourceInfo>,
}

pub struct TransactionGrouper {
    extractor: Arc<ResourceExtractor>,
    config: ParallelExecutionConfig,
}

impl TransactionGrouper {
    pub fn new(extractor: Arc<ResourceExtractor>, config: ParallelExecutionConfig) -> Self {
        Self { extractor, config }
    }

    pub async fn group(
        &self,
        chain_context: &ChainContext,
        transactions: Vec<Transaction>,
        cancel: &CancellationToken,
    ) -> GroupedTransactions {
        self.group_with_infos(chain_context, transactions, cancel)
            .await
            .grouped
    }

    pub async fn group_with_infos(
        &self,
        chain_context: &ChainContext,
        transactions: Vec<Transaction>,
        cancel: &CancellationToken,
    ) -> GroupingOutcome {
        let infos = self
            .extractor
            .get_resource_infos(chain_context, &transactions, cancel)
            .await;

        let mut grouped = GroupedTransactions::default();
        let mut parallel: Vec<(Transaction, &TransactionResourceInfo)> = Vec::new();

        for (transaction, info) in transactions.into_iter().zip(infos.iter()) {
            match info.parallel_type {
                ParallelType::InvalidContractAddress => grouped.without_contract.push(transaction),
                _ if !self.config.enable_parallel => grouped.non_parallelizables.push(transaction),
                ParallelType::NonParallelizable
                    if self.config.grouping_strategy == GroupingStrategy::ResourceAnalysis =>
                {
                    grouped.non_parallelizables.push(transaction)
                }
                _ => parallel.push((transaction, info)),
            }
        }

        let groups = match self.config.grouping_strategy {
            GroupingStrategy::ResourceAnalysis => {
                let declared: Vec<&TransactionResourceInfo> =
                    parallel.iter().map(|(_, info)| *info).collect();
                group_by_keys(&declared, self.config.read_sharing)
            }
            GroupingStrategy::Sender => {
                let senders: Vec<_> = parallel.iter().map(|(tx, _)| tx.from).collect();
                group_by_sender(&senders)
            }
        };
        let groups = match self.config.max_parallel_groups {
            Some(max) => balance_groups(groups, max),
            None => groups,
        };

        let mut slots: Vec<Option<Transaction>> =
            parallel.into_iter().map(|(tx, _)| Some(tx)).collect();
        grouped.parallelizables = groups
            .into_iter()
            .map(|group| group.into_iter().filter_map(|i| slots[i].take()).collect())
            .collect();

        debug!(
            parallel_groups = grouped.parallelizables.len(),
            non_parallelizable = grouped.non_parallelizables.len(),
            without_contract = grouped.without_contract.len(),
            "[qc-12] Grouped transactions"
        );

        let resource_infos = infos
            .into_iter()
            .map(|info| (info.transaction_id, info))
            .collect();
        GroupingOutcome {
            grouped,
            resource_infos,
        }
    }
}
