//! Group Balancer
//!
//! Caps the number of parallel groups by bin-packing: groups are placed largest
//! first into the currently least loaded bin (LPT scheduling). Merging disjoint
//! groups keeps them disjoint.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Pack `groups` (index lists, ascending) into at most `max_groups` bins.
///
/// Output bins keep their members ascending and are ordered by first member.
/// Ties are broken by input position so the result is deterministic.
pub fn balance_groups(groups: Vec<Vec<usize>>, max_groups: usize) -> Vec<Vec<usize>> {
    if max_groups == 0 || groups.len() <= max_groups {
        return groups;
    }

    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by_key(|&i| (Reverse(groups[i].len()), i));

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); max_groups];
    // (load, bin index), min-heap
    let mut loads: BinaryHeap<Reverse<(usize, usize)>> =
        (0..max_groups).map(|bin| Reverse((0, bin))).collect();

    for group_index in order {
        let Some(Reverse((load, bin))) = loads.pop() else {
            break;
        };
        let group = &groups[group_index];
        bins[bin].extend_from_slice(group);
        loads.push(Reverse((load + group.len(), bin)));
    }

    let mut bins: Vec<Vec<usize>> = bins
        .into_iter()
        .filter(|bin| !bin.is_empty())
        .map(|mut bin| {
            bin.sort_unstable();
            bin
        })
        .collect();
    bins.sort_by_key(|bin| bin[0]);
    bins
}
