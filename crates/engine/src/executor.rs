//! The node executor contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mbflow_core::{ExecutionId, NodeId, WorkflowId};
use mbflow_execution::VariableSet;
use mbflow_expression::EvaluationContext;
use mbflow_workflow::NodeDefinition;
use thiserror::Error;

/// An executor failure, classified for the retry wrapper.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transient failure (network, rate limit); eligible for retry.
    #[error("retriable: {0}")]
    Retriable(String),

    /// Permanent failure; surfaces to the error strategy immediately.
    #[error("{0}")]
    Fatal(String),

    /// The node exceeded its execution deadline. Non-retriable.
    #[error("node timed out after {0:?}")]
    Timeout(Duration),

    /// The execution was cancelled while the node ran.
    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    /// Create a transient failure.
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Retriable(message.into())
    }

    /// Create a permanent failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns `true` if the retry wrapper may re-attempt this failure.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

/// The resolved inputs handed to one node invocation.
#[derive(Debug, Clone)]
pub struct NodeExecutionInputs {
    /// The execution this invocation belongs to.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The node being invoked.
    pub node_id: NodeId,
    /// The scoped input set the node should read from.
    pub variables: VariableSet,
    /// The read-only global context.
    pub global: VariableSet,
    /// Raw per-parent output sets, for introspection.
    pub parent_outputs: HashMap<NodeId, VariableSet>,
}

impl NodeExecutionInputs {
    /// Build an expression evaluation context: global context first, bound
    /// variables shadowing it.
    #[must_use]
    pub fn evaluation_context(&self) -> EvaluationContext {
        let mut ctx = EvaluationContext::new();
        ctx.layer(self.global.iter());
        ctx.layer(self.variables.iter());
        ctx
    }
}

/// A pluggable node implementation.
///
/// Executors are pure with respect to the engine (they hold no engine
/// state) but may perform arbitrary I/O. Output keys are strings, values
/// are JSON-representable.
#[async_trait]
pub trait NodeExecutor: Send + Sync + std::fmt::Debug {
    /// Run the node against its resolved inputs.
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError>;
}
