#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # MBFlow Workflow
//!
//! The definition side of the MBFlow workflow engine: the immutable
//! node/edge/trigger data model, the [`WorkflowBuilder`] that enforces the
//! aggregate invariants, and the [`DependencyGraph`] used for validation
//! and wave computation.

pub mod builder;
pub mod definition;
pub mod edge;
pub mod error;
pub mod graph;
pub mod node;
pub mod trigger;

pub use builder::WorkflowBuilder;
pub use definition::Workflow;
pub use edge::{EdgeConfig, EdgeDefinition, EdgeKind, JoinStrategy};
pub use error::{GraphError, WorkflowError};
pub use graph::DependencyGraph;
pub use node::{
    CollisionStrategy, InputBinding, NodeDefinition, NodeKind, SchemaViolation, ValueSchema,
    ValueType,
};
pub use trigger::{TriggerDefinition, TriggerKind};

/// Serde helper for `Option<Duration>` serialized as milliseconds.
pub(crate) mod serde_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize an `Option<Duration>` as an optional integer of milliseconds.
    pub fn serialize<S: Serializer>(duration: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(s),
            None => s.serialize_none(),
        }
    }

    /// Deserialize an optional integer of milliseconds into `Option<Duration>`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<u64> = Option::deserialize(d)?;
        Ok(opt.map(Duration::from_millis))
    }
}
