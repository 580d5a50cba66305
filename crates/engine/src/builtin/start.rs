//! The pass-through start marker.

use async_trait::async_trait;
use mbflow_execution::VariableSet;
use mbflow_workflow::NodeDefinition;

use crate::executor::{NodeError, NodeExecutionInputs, NodeExecutor};

/// Echoes its bound inputs unchanged. Entry nodes produce an empty output
/// (their callers read the global context directly).
#[derive(Debug, Default)]
pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        Ok(inputs.variables.clone())
    }
}
