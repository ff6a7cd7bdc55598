//! Domain invariants for Parallel Execution
//!
//! Checked by the executor before running groups and by tests.

use super::entities::{ExecutionReturnSet, GroupedTransactions, TransactionResourceInfo};
use super::value_objects::{Hash, StateKey};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// INVARIANT-1: Group Disjointness
/// No declared key is shared by two parallel groups.
///
/// With `read_sharing` only keys written by some transaction of the batch count.
/// Returns the first offending `(group, group, key)` triple.
pub fn find_shared_key(
    groups: &[Vec<&TransactionResourceInfo>],
    read_sharing: bool,
) -> Option<(usize, usize, StateKey)> {
    let written: BTreeSet<&StateKey> = groups
        .iter()
        .flatten()
        .flat_map(|info| info.write_paths.iter())
        .collect();

    let mut owner: BTreeMap<&StateKey, usize> = BTreeMap::new();
    for (group_index, group) in groups.iter().enumerate() {
        let keys: BTreeSet<&StateKey> = group.iter().flat_map(|info| info.footprint()).collect();
        for key in keys {
            if read_sharing && !written.contains(key) {
                continue;
            }
            match owner.get(key) {
                Some(&other) if other != group_index => {
                    return Some((other, group_index, key.clone()));
                }
                _ => {
                    owner.insert(key, group_index);
                }
            }
        }
    }

    None
}

pub fn invariant_groups_disjoint(
    groups: &[Vec<&TransactionResourceInfo>],
    read_sharing: bool,
) -> bool {
    find_shared_key(groups, read_sharing).is_none()
}

/// INVARIANT-2: Footprint Containment
/// Every key a transaction touched was declared.
pub fn invariant_within_footprint(
    info: &TransactionResourceInfo,
    return_set: &ExecutionReturnSet,
) -> bool {
    return_set.touched_keys().all(|key| info.declares(key))
}

/// INVARIANT-3: Completeness
/// Every input transaction lands in exactly one bucket.
pub fn invariant_completeness(grouped: &GroupedTransactions, inputs: &[Hash]) -> bool {
    let mut seen: HashSet<Hash> = HashSet::new();
    let all = grouped
        .non_parallelizables
        .iter()
        .chain(grouped.without_contract.iter())
        .chain(grouped.parallelizables.iter().flatten());

    for tx in all {
        if !seen.insert(tx.id()) {
            return false;
        }
    }

    seen.len() == inputs.len() && inputs.iter().all(|id| seen.contains(id))
}

/// INVARIANT-4: Input Order
/// Return sets follow the block's declared order (a prefix of it may be missing
/// entries when the pass was cancelled, never reordered).
pub fn invariant_input_order(inputs: &[Hash], return_sets: &[ExecutionReturnSet]) -> bool {
    let position: BTreeMap<&Hash, usize> = inputs.iter().enumerate().map(|(i, h)| (h, i)).collect();
    let mut last: Option<usize> = None;

    for set in return_sets {
        let Some(&index) = position.get(&set.transaction_id) else {
            return false;
        };
        if last.is_some_and(|prev| prev >= index) {
            return false;
        }
        last = Some(index);
    }

    true
}
