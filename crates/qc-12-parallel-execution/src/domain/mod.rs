//! Domain module for Parallel Execution
//!
//! Contains core entities, value objects, partial state, errors, and invariants.

pub mod entities;
pub mod errors;
pub mod invariants;
pub mod state;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use state::{BlockStateSet, LocalValue};
pub use value_objects::*;
