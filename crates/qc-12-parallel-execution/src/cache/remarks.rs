//! # Contract Remarks Cache (Fork-Aware)
//!
//! Remembers which contract code versions must not be parallelized.
//!
//! ## Problem
//!
//! A remark is learned while executing a block that may still be reorganized away.
//! A sibling branch must not see it, or it would serialize transactions for no
//! reason (or worse, disagree with other nodes about grouping).
//!
//! ## Solution: Block-Tagged Pending Entries
//!
//! - Pending remarks carry the `BlockIndex` they were learned at.
//! - Lookups walk the query branch backwards through `ChainLinkLookup` and only
//!   accept a remark recorded on that branch.
//! - Once the recording block is irreversible the remark moves to a durable
//!   per-address map that every branch sees.
//! - The height promoted so far lives here too, so every event handler sharing
//!   the cache resumes from the same floor.

use crate::domain::entities::{BlockHeader, ContractRemark};
use crate::domain::value_objects::{Address, BlockIndex, ChainContext, Hash};
use crate::ports::outbound::ChainLinkLookup;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Fork-aware `address -> remark` cache.
pub struct ContractRemarksCache {
    /// Fork-pending remarks, several per address (one per recording block)
    pending: DashMap<Address, Vec<ContractRemark>>,
    /// Remarks of irreversible blocks
    durable: DashMap<Address, ContractRemark>,
    link_lookup: Arc<dyn ChainLinkLookup>,
    max_walk_depth: u64,
    /// Irreversible height up to which remarks were promoted
    promoted_height: Mutex<Option<u64>>,
}

impl ContractRemarksCache {
    pub fn new(link_lookup: Arc<dyn ChainLinkLookup>, max_walk_depth: u64) -> Self {
        Self {
            pending: DashMap::new(),
            durable: DashMap::new(),
            link_lookup,
            max_walk_depth,
            promoted_height: Mutex::new(None),
        }
    }

    /// Remark for `address` visible from `chain_context`, if any.
    pub async fn get_remark(
        &self,
        chain_context: &ChainContext,
        address: Address,
    ) -> Option<ContractRemark> {
        // Snapshot so no shard lock is held across the walk
        let pending = self
            .pending
            .get(&address)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        if let Some(remark) = self.walk_branch(chain_context, &pending).await {
            return Some(remark);
        }

        self.durable.get(&address).map(|entry| entry.value().clone())
    }

    async fn walk_branch(
        &self,
        chain_context: &ChainContext,
        pending: &[ContractRemark],
    ) -> Option<ContractRemark> {
        let lowest = pending
            .iter()
            .filter_map(|remark| remark.block_index)
            .map(|index| index.block_height)
            .min()?;

        let mut by_block: HashMap<Hash, &ContractRemark> = HashMap::new();
        for remark in pending {
            if let Some(index) = remark.block_index {
                by_block.insert(index.block_hash, remark);
            }
        }

        let mut block_hash = chain_context.block_hash;
        let mut height = chain_context.block_height;
        let mut depth = 0u64;

        loop {
            if let Some(remark) = by_block.get(&block_hash) {
                return Some((*remark).clone());
            }
            if height <= lowest || depth >= self.max_walk_depth {
                return None;
            }
            block_hash = self.link_lookup.get_parent_link(block_hash).await?;
            height -= 1;
            depth += 1;
        }
    }

    /// Record that `code_hash` at `address` is non-parallelizable as of `block_header`.
    pub fn set_remark(&self, address: Address, code_hash: Hash, block_header: &BlockHeader) {
        let block_index = block_header.block_index();
        let mut entry = self.pending.entry(address).or_default();

        let known = entry
            .iter()
            .any(|r| r.block_index == Some(block_index) && r.code_hash == code_hash);
        if known {
            return;
        }

        entry.push(ContractRemark::non_parallelizable_at(
            address,
            code_hash,
            block_index,
        ));

        debug!(
            address = ?address,
            code_hash = ?code_hash,
            height = block_index.block_height,
            "[qc-12] Contract code marked non-parallelizable"
        );
    }

    /// Drop pending remarks recorded on discarded blocks.
    pub fn remove_fork_cache(&self, discarded: &[BlockIndex]) {
        let discarded: HashSet<Hash> = discarded.iter().map(|i| i.block_hash).collect();
        let before = self.pending_len();

        self.pending.retain(|_, remarks| {
            remarks.retain(|remark| {
                remark
                    .block_index
                    .is_some_and(|index| !discarded.contains(&index.block_hash))
            });
            !remarks.is_empty()
        });

        let removed = before.saturating_sub(self.pending_len());
        if removed > 0 {
            debug!(removed, "[qc-12] Removed remarks of pruned branches");
        }
    }

    /// Move remarks recorded on finalized blocks into the durable map.
    ///
    /// Per address the highest finalized remark wins. Pending remarks at or below
    /// the highest finalized height that were not finalized are dead branches and
    /// are pruned. Returns the promoted remarks (durable form, sorted by address)
    /// for persistence; a repeated call with the same indexes returns nothing.
    pub fn promote_irreversible(&self, finalized: &[BlockIndex]) -> Vec<ContractRemark> {
        let Some(max_height) = finalized.iter().map(|i| i.block_height).max() else {
            return Vec::new();
        };
        let finalized: HashSet<Hash> = finalized.iter().map(|i| i.block_hash).collect();
        let mut promoted: Vec<ContractRemark> = Vec::new();

        self.pending.retain(|_, remarks| {
            let best = remarks
                .iter()
                .filter_map(|remark| remark.block_index.map(|index| (index, remark)))
                .filter(|(index, _)| finalized.contains(&index.block_hash))
                .max_by_key(|(index, _)| index.block_height)
                .map(|(_, remark)| ContractRemark {
                    block_index: None,
                    ..remark.clone()
                });
            promoted.extend(best);

            remarks.retain(|remark| {
                remark.block_index.is_some_and(|index| {
                    !finalized.contains(&index.block_hash) && index.block_height > max_height
                })
            });
            !remarks.is_empty()
        });

        promoted.sort_by_key(|remark| remark.contract_address);
        for remark in &promoted {
            self.durable.insert(remark.contract_address, remark.clone());
        }

        if !promoted.is_empty() {
            info!(
                count = promoted.len(),
                height = max_height,
                "[qc-12] Promoted contract remarks to durable"
            );
        }
        promoted
    }

    /// Warm the durable map from persisted remarks.
    pub fn load_durable(&self, remarks: impl IntoIterator<Item = ContractRemark>) {
        for remark in remarks {
            self.durable.insert(
                remark.contract_address,
                ContractRemark {
                    block_index: None,
                    ..remark
                },
            );
        }
    }

    /// Irreversible height already promoted, `None` before the first promotion.
    pub fn promoted_height(&self) -> Option<u64> {
        *self.promoted_height.lock()
    }

    /// Raise the promoted floor to `height`. Never lowers it.
    pub fn record_promoted(&self, height: u64) {
        let mut floor = self.promoted_height.lock();
        *floor = Some(floor.map_or(height, |h| h.max(height)));
    }

    /// Height of the lowest block carrying a pending remark.
    pub fn lowest_pending_height(&self) -> Option<u64> {
        self.pending
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter_map(|remark| remark.block_index)
                    .map(|index| index.block_height)
                    .collect::<Vec<_>>()
            })
            .min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn durable_len(&self) -> usize {
        self.durable.len()
    }
}
