//! Application layer for Parallel Execution
//!
//! Resource extraction, grouping, group execution, conflict identification,
//! block pipeline events and the service tying them together.

pub mod conflict_identifier;
pub mod events;
pub mod executor;
pub mod grouper;
pub mod resource_extractor;
pub mod service;

pub use conflict_identifier::ConflictingTransactionIdentifier;
pub use events::BlockEventHandler;
pub use grouper::{GroupingOutcome, TransactionGrouper};
pub use resource_extractor::ResourceExtractor;
pub use service::{ExecutionPorts, ParallelExecutionService};
