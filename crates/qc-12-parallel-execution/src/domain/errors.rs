//! Error types for Parallel Execution
//!
//! Only `ExecutionError` ever reaches the block pipeline. Extraction and executive
//! failures are absorbed per transaction.

use super::value_objects::{Address, Hash, StateKey};
use thiserror::Error;

/// Errors that abort a whole execution pass
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Two parallel groups share a declared key; the grouper is broken
    #[error("Invariant violated: parallel groups {first} and {second} share key {key}")]
    InvariantViolation {
        first: usize,
        second: usize,
        key: StateKey,
    },

    /// Blockchain store failed while identifying conflicts
    #[error("Blockchain store failure: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Why a declared footprint could not be obtained
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Contract not found at {address:?}")]
    ContractNotFound { address: Address },

    #[error("Contract {address:?} is being deployed or upgraded")]
    ContractDeploying { address: Address },

    #[error("Contract code {code_hash:?} is marked non-parallelizable")]
    NonParallelContractCode { code_hash: Hash },

    #[error("Resource declaration failed: {0}")]
    DeclarationFailed(#[from] ExecutiveError),

    #[error("Resource declaration unparsable: {0}")]
    Unparsable(String),

    #[error("Contract declared itself non-parallelizable")]
    DeclaredNonParallelizable { code_hash: Hash },

    #[error("Extraction cancelled")]
    Cancelled,
}

/// Failures reported by the opaque executive
#[derive(Debug, Error)]
pub enum ExecutiveError {
    #[error("No executive for contract {address:?}")]
    NotFound { address: Address },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("State access failed: {0}")]
    State(#[from] StateError),
}

/// State store read failure
#[derive(Debug, Error)]
#[error("State read failed for key {key}: {reason}")]
pub struct StateError {
    pub key: StateKey,
    pub reason: String,
}

/// Blockchain store failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transaction not found: {0:?}")]
    TransactionNotFound(Hash),

    #[error("Block not found: {0:?}")]
    BlockNotFound(Hash),

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Configuration rejected by validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_parallel_groups must be greater than zero")]
    ZeroParallelGroups,

    #[error("max_fork_walk_depth must be greater than zero")]
    ZeroForkWalkDepth,
}
