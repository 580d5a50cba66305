#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # MBFlow Engine
//!
//! The orchestrator of the MBFlow workflow engine. It compiles a
//! [`Workflow`](mbflow_workflow::Workflow) into a wave schedule and drives
//! it to a terminal phase:
//!
//! 1. Waves execute level by level with bounded concurrency
//! 2. Each node's inputs are bound from its activated parents
//!    ([`VariableBinder`]), wrapped in retry and per-kind circuit breakers
//! 3. Outcomes flow back into the event-sourced aggregate, the
//!    [`JoinCoordinator`], and registered observers
//!
//! ```no_run
//! use std::sync::Arc;
//! use mbflow_engine::{EngineConfig, ExecutorRegistry, WorkflowEngine};
//! use mbflow_events::InMemoryEventStore;
//! use mbflow_workflow::{NodeKind, TriggerDefinition, WorkflowBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = WorkflowBuilder::new("hello");
//! builder.add_node(NodeKind::start(), "start")?;
//!
//! let engine = WorkflowEngine::new(
//!     ExecutorRegistry::with_builtins(),
//!     Arc::new(InMemoryEventStore::new()),
//!     EngineConfig::default(),
//! );
//! let report = engine
//!     .execute(&builder.build()?, &TriggerDefinition::manual(), serde_json::Map::new())
//!     .await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod binder;
pub mod builtin;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod joins;
pub mod registry;
pub mod report;
pub mod strategy;

pub use binder::{BindError, VariableBinder};
pub use config::EngineConfig;
pub use engine::WorkflowEngine;
pub use error::EngineError;
pub use executor::{NodeError, NodeExecutionInputs, NodeExecutor};
pub use joins::{BranchStatus, JoinCoordinator, JoinDecision};
pub use registry::ExecutorRegistry;
pub use report::ExecutionReport;
pub use strategy::ErrorStrategy;
