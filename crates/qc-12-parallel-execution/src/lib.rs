//! # QC-12: Parallel Execution Subsystem
//!
//! Executes one block's transactions concurrently where their declared state
//! footprints allow it, and reconciles the result against what they actually
//! touched.
//!
//! ## Architecture
//!
//! - **Domain**: Core entities (Transaction, TransactionResourceInfo, ExecutionReturnSet,
//!   GroupedTransactions, ContractRemark), partial state, errors, invariants
//! - **Algorithms**: Union-find grouping, group balancing, conflict detection
//! - **Cache**: Fork-aware contract remarks, per-transaction resource info
//! - **Ports**: Inbound (ParallelExecutionApi) and Outbound (ExecutiveProvider,
//!   StateReader, BlockchainStore, ChainLinkLookup)
//! - **Application**: Extraction, grouping, execution, conflict identification, events
//!
//! ## Flow
//!
//! grouper -> (resource cache -> extractor -> remarks cache) -> groups run
//! concurrently -> merge detects cross-group overlap -> conflict identifier flags
//! lying transactions -> their contract code is remarked -> conflicting
//! transactions are re-executed sequentially.

pub mod algorithms;
pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod ports;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use application::{
    BlockEventHandler, ExecutionPorts, ParallelExecutionService, ResourceExtractor,
    TransactionGrouper,
};
pub use cache::{ContractRemarksCache, ResourceInfoCache};
pub use config::ParallelExecutionConfig;
pub use domain::entities::*;
pub use domain::errors::*;
pub use domain::state::BlockStateSet;
pub use domain::value_objects::*;
pub use ports::inbound::ParallelExecutionApi;
pub use ports::outbound::{
    BlockchainStore, ChainLinkLookup, ChainStateProvider, Executive, ExecutiveProvider,
    StateReader,
};
pub use state::{StateOverlay, TransactionState};
