//! Conflict Detector
//!
//! Key-overlap checks on actual access sets, used at merge time and when
//! narrowing down which transactions lied about their footprint.

use crate::domain::entities::{ExecutionReturnSet, TransactionResourceInfo};
use crate::domain::invariants::invariant_within_footprint;
use crate::domain::value_objects::{Hash, ParallelType, StateKey};
use std::collections::{BTreeSet, HashSet};

/// Keys read by some return set and written by none.
pub fn read_only_keys<'a>(
    return_sets: impl IntoIterator<Item = &'a ExecutionReturnSet>,
) -> BTreeSet<StateKey> {
    let mut read = BTreeSet::new();
    let mut written = BTreeSet::new();

    for set in return_sets {
        for (key, is_write) in &set.state_accesses {
            if *is_write {
                written.insert(key);
            } else {
                read.insert(key);
            }
        }
    }

    read.into_iter()
        .filter(|key| !written.contains(key))
        .cloned()
        .collect()
}

/// Touched keys of `set` that can conflict.
pub fn conflict_keys<'a>(
    set: &'a ExecutionReturnSet,
    read_only: &'a BTreeSet<StateKey>,
) -> impl Iterator<Item = &'a StateKey> + 'a {
    set.touched_keys().filter(move |key| !read_only.contains(*key))
}

/// Decide, in group order, which groups lose the merge.
///
/// A group conflicts when one of its non-read-only keys was touched by an
/// already accepted group. Returns one flag per group (`true` = conflicting).
pub fn find_conflicting_groups(groups: &[Vec<ExecutionReturnSet>]) -> Vec<bool> {
    let read_only = read_only_keys(groups.iter().flatten());
    let mut accepted_keys: HashSet<&StateKey> = HashSet::new();
    let mut flags = Vec::with_capacity(groups.len());

    for group in groups {
        let keys: HashSet<&StateKey> = group
            .iter()
            .flat_map(|set| conflict_keys(set, &read_only))
            .collect();

        let conflicting = keys.iter().any(|key| accepted_keys.contains(key));
        if !conflicting {
            accepted_keys.extend(keys);
        }
        flags.push(conflicting);
    }

    flags
}

/// Transactions on either side whose non-read-only keys meet the other side's.
///
/// Accepted candidates come first, each side in the order given.
pub fn conflict_candidates(
    accepted: &[ExecutionReturnSet],
    rejected: &[ExecutionReturnSet],
) -> Vec<Hash> {
    let read_only = read_only_keys(accepted.iter().chain(rejected.iter()));
    let side_keys = |sets: &[ExecutionReturnSet]| -> HashSet<StateKey> {
        sets.iter()
            .flat_map(|set| conflict_keys(set, &read_only))
            .cloned()
            .collect()
    };
    let accepted_keys = side_keys(accepted);
    let rejected_keys = side_keys(rejected);

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let sides = [(accepted, &rejected_keys), (rejected, &accepted_keys)];

    for (sets, other_keys) in sides {
        for set in sets {
            let hits = conflict_keys(set, &read_only).any(|key| other_keys.contains(key));
            if hits && seen.insert(set.transaction_id) {
                candidates.push(set.transaction_id);
            }
        }
    }

    candidates
}

/// A parallelizable transaction touched a key it did not declare.
pub fn escapes_footprint(info: &TransactionResourceInfo, set: &ExecutionReturnSet) -> bool {
    info.parallel_type == ParallelType::Parallelizable && !invariant_within_footprint(info, set)
}
