//! Algorithms module for Parallel Execution
//!
//! Contains:
//! - Union-find grouping over declared keys (and by sender)
//! - Group balancer
//! - Conflict detector

pub mod balancer;
pub mod conflict_detector;
pub mod union_find;

pub use balancer::balance_groups;
pub use conflict_detector::{
    conflict_candidates, escapes_footprint, find_conflicting_groups, read_only_keys,
};
pub use union_find::{group_by_keys, group_by_sender, DisjointSet};
