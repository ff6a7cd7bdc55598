//! Conflicting Transaction Identifier
//!
//! After a merge, finds the transactions that caused it to fail: those whose
//! actual access escaped their declared footprint.

use super::resource_extractor::ResourceExtractor;
use crate::algorithms::{conflict_candidates, escapes_footprint};
use crate::domain::entities::{ExecutionReturnSet, Transaction, TransactionResourceInfo};
use crate::domain::errors::StoreError;
use crate::domain::value_objects::{ChainContext, Hash};
use crate::ports::outbound::BlockchainStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ConflictingTransactionIdentifier {
    store: Arc<dyn BlockchainStore>,
    extractor: Arc<ResourceExtractor>,
}

impl ConflictingTransactionIdentifier {
    pub fn new(store: Arc<dyn BlockchainStore>, extractor: Arc<ResourceExtractor>) -> Self {
        Self { store, extractor }
    }

    /// Transactions that lied about their footprint, all looked up in the store.
    pub async fn identify_conflicts(
        &self,
        chain_context: &ChainContext,
        accepted: &[ExecutionReturnSet],
        rejected: &[ExecutionReturnSet],
    ) -> Result<Vec<Transaction>, StoreError> {
        let wrong = self
            .identify_wrong_resources(chain_context, &[], accepted, rejected)
            .await?;
        Ok(wrong.into_iter().map(|(tx, _)| tx).collect())
    }

    /// Like `identify_conflicts`, keeping the re-obtained declaration of each.
    ///
    /// Candidates are resolved from `known` first and from the store otherwise. A
    /// candidate found in neither is skipped; other store failures are returned.
    pub async fn identify_wrong_resources(
        &self,
        chain_context: &ChainContext,
        known: &[Transaction],
        accepted: &[ExecutionReturnSet],
        rejected: &[ExecutionReturnSet],
    ) -> Result<Vec<(Transaction, TransactionResourceInfo)>, StoreError> {
        let candidates = conflict_candidates(accepted, rejected);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!(candidates = candidates.len(), "[qc-12] Checking conflict candidates");

        let transactions = self.resolve(known, &candidates).await?;
        let return_sets: HashMap<Hash, &ExecutionReturnSet> = accepted
            .iter()
            .chain(rejected.iter())
            .map(|set| (set.transaction_id, set))
            .collect();

        let mut wrong = Vec::new();
        for transaction in transactions {
            let transaction_id = transaction.id();
            let Some(return_set) = return_sets.get(&transaction_id) else {
                continue;
            };
            let info = self
                .extractor
                .get_cached_resource_info(chain_context, &transaction)
                .await;

            if escapes_footprint(&info, return_set) {
                warn!(
                    tx = ?transaction_id,
                    contract = ?transaction.to,
                    "[qc-12] Transaction accessed undeclared state"
                );
                wrong.push((transaction, info));
            }
        }

        Ok(wrong)
    }

    async fn resolve(
        &self,
        known: &[Transaction],
        candidates: &[Hash],
    ) -> Result<Vec<Transaction>, StoreError> {
        let known: HashMap<Hash, &Transaction> = known.iter().map(|tx| (tx.id(), tx)).collect();
        let mut transactions = Vec::with_capacity(candidates.len());

        for id in candidates {
            if let Some(transaction) = known.get(id) {
                transactions.push((*transaction).clone());
                continue;
            }
            match self.store.get_transactions_by_id(std::slice::from_ref(id)).await {
                Ok(found) => transactions.extend(found),
                Err(StoreError::TransactionNotFound(missing)) => {
                    warn!(tx = ?missing, "[qc-12] Conflict candidate not found, skipped");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(transactions)
    }
}
