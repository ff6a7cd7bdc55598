//! Block Pipeline Events
//!
//! Explicit hooks the block pipeline calls to keep the caches in step with the
//! chain. There is no event bus; the caller decides when each one fires.

use super::resource_extractor::ResourceExtractor;
use crate::cache::{ContractRemarksCache, ResourceInfoCache};
use crate::domain::entities::{Block, ContractRemark, Transaction};
use crate::domain::errors::StoreError;
use crate::domain::value_objects::BlockIndex;
use crate::ports::outbound::BlockchainStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct BlockEventHandler {
    store: Arc<dyn BlockchainStore>,
    extractor: Arc<ResourceExtractor>,
    resource_cache: Arc<ResourceInfoCache>,
    remarks: Arc<ContractRemarksCache>,
}

impl BlockEventHandler {
    pub fn new(
        store: Arc<dyn BlockchainStore>,
        extractor: Arc<ResourceExtractor>,
        resource_cache: Arc<ResourceInfoCache>,
        remarks: Arc<ContractRemarksCache>,
    ) -> Self {
        Self {
            store,
            extractor,
            resource_cache,
            remarks,
        }
    }

    /// Precompute the footprint of a pool transaction at the best chain.
    pub async fn on_transaction_accepted(
        &self,
        transaction: &Transaction,
    ) -> Result<(), StoreError> {
        let chain = self.store.get_chain().await?;
        let info = self
            .extractor
            .get_cached_resource_info(&chain.best_context(), transaction)
            .await;
        debug!(
            tx = ?info.transaction_id,
            parallel_type = ?info.parallel_type,
            "[qc-12] Resource info precomputed"
        );
        Ok(())
    }

    /// A block made it into the chain; its transactions leave the pool.
    pub fn on_block_accepted(&self, block: &Block) {
        self.resource_cache.invalidate(&block.transaction_ids);
    }

    /// A new last irreversible block.
    ///
    /// Drops stale resource info, then promotes the remarks recorded on blocks
    /// finalized since the last promotion. The walk down from `lib` stops at the
    /// promoted floor kept by the remarks cache, or at the lowest pending remark
    /// if that is higher. Returns the promoted remarks for persistence.
    pub async fn on_new_irreversible_block(
        &self,
        lib: BlockIndex,
    ) -> Result<Vec<ContractRemark>, StoreError> {
        self.resource_cache.clear_irreversible(lib.block_height);

        let floor = self.remarks.promoted_height();
        if floor.is_some_and(|height| height >= lib.block_height) {
            return Ok(Vec::new());
        }

        let lowest = self.remarks.lowest_pending_height();
        let stop_below = match (lowest, floor) {
            (Some(lowest), Some(height)) => lowest.max(height + 1),
            (Some(lowest), None) => lowest,
            (None, _) => lib.block_height + 1,
        };

        let mut finalized = Vec::new();
        let mut cursor = (stop_below <= lib.block_height).then_some(lib.block_hash);
        while let Some(hash) = cursor {
            let Some(block) = self.store.get_block_by_hash(hash).await? else {
                warn!(block = ?hash, "[qc-12] Irreversible branch has a missing block");
                break;
            };
            if block.header.height < stop_below {
                break;
            }
            finalized.push(block.header.block_index());
            cursor = (block.header.height > stop_below)
                .then_some(block.header.previous_block_hash);
        }

        let promoted = self.remarks.promote_irreversible(&finalized);
        self.remarks.record_promoted(lib.block_height);

        info!(
            lib_height = lib.block_height,
            finalized = finalized.len(),
            promoted = promoted.len(),
            "[qc-12] Irreversible block processed"
        );
        Ok(promoted)
    }

    /// Branches were discarded by fork choice.
    pub fn on_branches_pruned(&self, discarded: &[BlockIndex]) {
        self.remarks.remove_fork_cache(discarded);
    }
}
