//! Configuration for the Parallel Execution Subsystem

use crate::domain::errors::ConfigError;
use crate::domain::value_objects::GroupingStrategy;
use serde::{Deserialize, Serialize};

/// Parallel execution configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelExecutionConfig {
    /// When false every resolvable transaction runs sequentially
    pub enable_parallel: bool,
    pub grouping_strategy: GroupingStrategy,
    /// Keys only read within a batch do not merge groups
    pub read_sharing: bool,
    /// Upper bound on concurrently executed groups (`None` = unbounded)
    pub max_parallel_groups: Option<usize>,
    /// Re-run transactions of conflicting groups after the merge
    pub reexecute_conflicts: bool,
    /// Ancestors visited by the remarks cache before falling back to durable remarks
    pub max_fork_walk_depth: u64,
}

impl Default for ParallelExecutionConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            grouping_strategy: GroupingStrategy::ResourceAnalysis,
            read_sharing: false,
            max_parallel_groups: None,
            reexecute_conflicts: true,
            max_fork_walk_depth: 1024,
        }
    }
}

impl ParallelExecutionConfig {
    /// Configuration that executes everything sequentially.
    pub fn sequential() -> Self {
        Self {
            enable_parallel: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_groups == Some(0) {
            return Err(ConfigError::ZeroParallelGroups);
        }
        if self.max_fork_walk_depth == 0 {
            return Err(ConfigError::ZeroForkWalkDepth);
        }
        Ok(())
    }
}
