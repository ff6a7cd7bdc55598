//! Value objects for Parallel Execution
//!
//! Identifiers, chain positions and the state key type shared by every component.

use primitive_types::{H160, H256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type aliases for clarity
pub type Hash = H256;
pub type Address = H160;

/// Separator between the address prefix and the path parts of a scoped key.
const PATH_SEPARATOR: u8 = b'/';

/// Opaque identifier of one unit of contract state.
///
/// Equality and ordering are byte-wise, so keys sort deterministically regardless of
/// how they were built.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateKey(Vec<u8>);

impl StateKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Key scoped to a contract: address bytes followed by the `/`-joined path.
    pub fn scoped(address: Address, parts: &[&str]) -> Self {
        let mut bytes = address.as_bytes().to_vec();
        for part in parts {
            bytes.push(PATH_SEPARATOR);
            bytes.extend_from_slice(part.as_bytes());
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateKey({})", hex::encode(&self.0))
    }
}

impl From<&str> for StateKey {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

/// Position of a block on some branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockIndex {
    pub block_hash: Hash,
    pub block_height: u64,
}

impl BlockIndex {
    pub fn new(block_hash: Hash, block_height: u64) -> Self {
        Self {
            block_hash,
            block_height,
        }
    }
}

/// Chain position a query or an execution pass runs against.
///
/// For block execution this is the parent of the block being executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainContext {
    pub block_hash: Hash,
    pub block_height: u64,
}

impl ChainContext {
    pub fn new(block_hash: Hash, block_height: u64) -> Self {
        Self {
            block_hash,
            block_height,
        }
    }

    pub fn block_index(&self) -> BlockIndex {
        BlockIndex::new(self.block_hash, self.block_height)
    }
}

/// Parallelizability verdict for one transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParallelType {
    /// Declared footprint is known, may run inside a parallel group
    Parallelizable,
    /// Footprint unknown or contract marked unsafe, must run sequentially
    NonParallelizable,
    /// Target contract could not be resolved
    InvalidContractAddress,
}

/// Outcome status of an executed transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Mined,
    Failed,
    /// Excluded from a parallel merge, not re-executed
    Conflict,
}

/// Strategy used to partition parallelizable transactions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupingStrategy {
    /// Union-find over declared read/write keys
    #[default]
    ResourceAnalysis,
    /// One group per sender address, declared resources ignored
    Sender,
}
