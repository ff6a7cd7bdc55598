//! Ports module for Parallel Execution
//!
//! Defines inbound (API) and outbound (SPI) port traits.

pub mod inbound;
pub mod outbound;

pub use inbound::ParallelExecutionApi;
pub use outbound::{
    BlockchainStore, ChainLinkLookup, ChainStateProvider, Executive, ExecutiveProvider,
    StateReader,
};
