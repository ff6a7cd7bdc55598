//! Union-Find Grouping
//!
//! Partitions transactions into connected components over their declared keys.
//! Two transactions sharing a key end up in the same group, transitively.

use crate::domain::entities::TransactionResourceInfo;
use crate::domain::value_objects::{Address, StateKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug)]
pub struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    pub fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (mut root_a, mut root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return;
        }
        if self.size[root_a] < self.size[root_b] {
            std::mem::swap(&mut root_a, &mut root_b);
        }
        self.parent[root_b] = root_a;
        self.size[root_a] += self.size[root_b];
    }

    /// Components as index lists, ordered by their smallest member, members ascending.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut first_of_root: HashMap<usize, usize> = HashMap::new();

        for node in 0..self.parent.len() {
            let root = self.find(node);
            let first = *first_of_root.entry(root).or_insert(node);
            by_root.entry(first).or_default().push(node);
        }

        by_root.into_values().collect()
    }
}

/// Group parallelizable transactions by shared declared keys.
///
/// Returns groups of indexes into `infos`. With `read_sharing`, keys that no
/// transaction of the batch writes are ignored for merging.
pub fn group_by_keys(infos: &[&TransactionResourceInfo], read_sharing: bool) -> Vec<Vec<usize>> {
    let written: BTreeSet<&StateKey> = if read_sharing {
        infos.iter().flat_map(|info| info.write_paths.iter()).collect()
    } else {
        BTreeSet::new()
    };

    let mut sets = DisjointSet::new(infos.len());
    let mut owner: HashMap<&StateKey, usize> = HashMap::new();

    for (index, info) in infos.iter().enumerate() {
        for key in info.footprint() {
            if read_sharing && !written.contains(key) {
                continue;
            }
            match owner.get(key) {
                Some(&first) => sets.union(first, index),
                None => {
                    owner.insert(key, index);
                }
            }
        }
    }

    sets.components()
}

/// Group transactions by sender only.
pub fn group_by_sender(senders: &[Address]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(senders.len());
    let mut owner: HashMap<Address, usize> = HashMap::new();

    for (index, sender) in senders.iter().enumerate() {
        match owner.get(sender) {
            Some(&first) => sets.union(first, index),
            None => {
                owner.insert(*sender, index);
            }
        }
    }

    sets.components()
}
