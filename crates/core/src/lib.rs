#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # MBFlow Core
//!
//! Core types for the MBFlow workflow engine: strongly-typed UUID
//! identifiers and variable scopes. Every other MBFlow crate builds on
//! these fundamentals.

pub mod id;
pub mod scope;

pub use id::{EdgeId, EventId, ExecutionId, NodeId, TriggerId, UuidParseError, WorkflowId};
pub use scope::VariableScope;

/// Common prelude for MBFlow crates.
pub mod prelude {
    pub use super::{
        EdgeId, EventId, ExecutionId, NodeId, TriggerId, UuidParseError, VariableScope, WorkflowId,
    };
}
