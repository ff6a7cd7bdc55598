//! Resource Info Cache
//!
//! Declared footprints keyed by transaction id, so a transaction seen in the pool
//! is not introspected again when a block containing it is grouped.
//!
//! Entries are branch independent: the key is the transaction id alone. Verdicts
//! that depend on the branch (contract remarks) are never stored, and callers
//! revalidate a hit against the query's chain context before using it.

use crate::domain::entities::TransactionResourceInfo;
use crate::domain::value_objects::{ChainContext, Hash, ParallelType};
use dashmap::DashMap;
use tracing::debug;

#[derive(Clone, Debug)]
struct CachedResourceInfo {
    info: TransactionResourceInfo,
    /// Highest block height the entry was used for
    resource_used_block_height: u64,
}

/// Concurrent `transaction id -> resource info` cache.
#[derive(Default)]
pub struct ResourceInfoCache {
    entries: DashMap<Hash, CachedResourceInfo>,
}

impl ResourceInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached info for `transaction_id`, bumping its used height.
    pub fn get(
        &self,
        chain_context: &ChainContext,
        transaction_id: &Hash,
    ) -> Option<TransactionResourceInfo> {
        let mut entry = self.entries.get_mut(transaction_id)?;
        let used = chain_context.block_height + 1;
        if used > entry.resource_used_block_height {
            entry.resource_used_block_height = used;
        }
        Some(entry.info.clone())
    }

    /// Store `info`, replacing any previous entry.
    ///
    /// Not cached: unresolvable contracts (the contract may be deployed by the time
    /// the transaction is grouped again) and remark verdicts (the remark may only
    /// hold on one branch).
    pub fn insert(&self, chain_context: &ChainContext, info: TransactionResourceInfo) {
        if info.parallel_type == ParallelType::InvalidContractAddress
            || info.is_nonparallel_contract_code
        {
            return;
        }
        let used = chain_context.block_height + 1;
        self.entries
            .entry(info.transaction_id)
            .and_modify(|entry| {
                entry.resource_used_block_height = entry.resource_used_block_height.max(used);
                entry.info = info.clone();
            })
            .or_insert(CachedResourceInfo {
                info,
                resource_used_block_height: used,
            });
    }

    pub fn invalidate(&self, transaction_ids: &[Hash]) {
        for id in transaction_ids {
            self.entries.remove(id);
        }
    }

    /// Drop entries only used at or below the last irreversible height.
    pub fn clear_irreversible(&self, lib_height: u64) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.resource_used_block_height > lib_height);
        debug!(
            removed = before.saturating_sub(self.entries.len()),
            lib_height, "[qc-12] Cleared irreversible resource info"
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
