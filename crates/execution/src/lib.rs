#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # MBFlow Execution
//!
//! Execution-time state for the MBFlow workflow engine:
//!
//! - [`ExecutionPhase`] and [`NodeStatus`] — the two state machines, with
//!   transitions validated by the [`transition`] module
//! - [`VariableSet`] / [`VariableStore`] — scoped variables with a frozen
//!   global context and per-node output tracking
//! - [`Execution`] — the event-sourced aggregate: commands in, events out,
//!   derived state rebuilt bit-identically by [`Execution::rebuild`]
//! - [`ExecutionPlan`] — the compiled wave schedule consumed by the
//!   scheduler
//!
//! This crate models state; the orchestrator lives in `mbflow-engine`.

pub mod aggregate;
pub mod error;
pub mod node_state;
pub mod plan;
pub mod status;
pub mod transition;
pub mod variables;

pub use aggregate::{Execution, SharedExecution};
pub use error::ExecutionError;
pub use node_state::NodeRunState;
pub use plan::{ExecutionPlan, JoinSpec, LoopSpec, PlanError};
pub use status::{ExecutionPhase, NodeStatus};
pub use variables::{VariableSet, VariableStore};
