//! Caches owned by the execution engine
//!
//! - `ContractRemarksCache`: fork-aware verdicts on contract code
//! - `ResourceInfoCache`: declared footprints per transaction

pub mod remarks;
pub mod resource_info;

pub use remarks::ContractRemarksCache;
pub use resource_info::ResourceInfoCache;
