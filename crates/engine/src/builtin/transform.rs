//! Expression-based transform node.
//!
//! Configuration:
//! - `assignments`: object of `output key → expression`, each evaluated
//!   against the node's bound inputs plus the global context.
//! - `passthrough` (optional, default false): merge the bound inputs into
//!   the output before applying assignments.

use async_trait::async_trait;
use mbflow_execution::VariableSet;
use mbflow_expression::Expression;
use mbflow_workflow::NodeDefinition;
use serde_json::Value;

use crate::executor::{NodeError, NodeExecutionInputs, NodeExecutor};

/// Evaluates configured expressions over the bound inputs.
#[derive(Debug, Default)]
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        let ctx = inputs.evaluation_context();

        let mut output = if passthrough(node) {
            inputs.variables.clone()
        } else {
            VariableSet::new()
        };

        if let Some(assignments) = node.config.get("assignments") {
            let Some(assignments) = assignments.as_object() else {
                return Err(NodeError::fatal("transform: assignments must be an object"));
            };
            for (key, expression) in assignments {
                let Some(source) = expression.as_str() else {
                    return Err(NodeError::fatal(format!(
                        "transform: assignment {key:?} must be an expression string"
                    )));
                };
                let value = Expression::parse(source)
                    .and_then(|e| e.evaluate(&ctx))
                    .map_err(|err| {
                        NodeError::fatal(format!("transform: {key}: {err}"))
                    })?;
                let _ = output.insert(key.clone(), value);
            }
        }

        Ok(output)
    }
}

fn passthrough(node: &NodeDefinition) -> bool {
    node.config
        .get("passthrough")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbflow_core::{ExecutionId, NodeId, WorkflowId};
    use mbflow_workflow::NodeKind;
    use serde_json::json;
    use std::collections::HashMap;

    fn inputs_with(vars: &[(&str, Value)], global: &[(&str, Value)]) -> NodeExecutionInputs {
        let mut variables = VariableSet::new();
        for (k, v) in vars {
            variables.insert((*k).to_string(), v.clone()).unwrap();
        }
        let mut global_set = VariableSet::new();
        for (k, v) in global {
            global_set.insert((*k).to_string(), v.clone()).unwrap();
        }
        global_set.freeze();

        NodeExecutionInputs {
            execution_id: ExecutionId::v4(),
            workflow_id: WorkflowId::v4(),
            node_id: NodeId::v4(),
            variables,
            global: global_set,
            parent_outputs: HashMap::new(),
        }
    }

    fn transform(config: Value) -> NodeDefinition {
        let mut node = NodeDefinition::new(NodeId::v4(), NodeKind::transform(), "t");
        if let Value::Object(map) = config {
            node.config = map;
        }
        node
    }

    #[tokio::test]
    async fn evaluates_assignments_against_global_context() {
        let node = transform(json!({"assignments": {"result": "input * 2"}}));
        let inputs = inputs_with(&[], &[("input", json!(21))]);

        let output = TransformExecutor.execute(&node, &inputs).await.unwrap();
        assert_eq!(output.get("result"), Some(&json!(42)));
        assert_eq!(output.len(), 1);
    }

    #[tokio::test]
    async fn bound_variables_shadow_global() {
        let node = transform(json!({"assignments": {"out": "value + 1"}}));
        let inputs = inputs_with(&[("value", json!(10))], &[("value", json!(100))]);

        let output = TransformExecutor.execute(&node, &inputs).await.unwrap();
        assert_eq!(output.get("out"), Some(&json!(11)));
    }

    #[tokio::test]
    async fn passthrough_merges_inputs_first() {
        let node = transform(json!({
            "passthrough": true,
            "assignments": {"sum": "a + b"}
        }));
        let inputs = inputs_with(&[("a", json!(1)), ("b", json!(2))], &[]);

        let output = TransformExecutor.execute(&node, &inputs).await.unwrap();
        assert_eq!(output.get("a"), Some(&json!(1)));
        assert_eq!(output.get("b"), Some(&json!(2)));
        assert_eq!(output.get("sum"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn no_assignments_without_passthrough_is_empty() {
        let node = transform(json!({}));
        let inputs = inputs_with(&[("x", json!(1))], &[]);
        let output = TransformExecutor.execute(&node, &inputs).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn expression_error_is_fatal() {
        let node = transform(json!({"assignments": {"bad": "missing * 2"}}));
        let inputs = inputs_with(&[], &[]);

        let err = TransformExecutor.execute(&node, &inputs).await.unwrap_err();
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("bad"));
    }

    #[tokio::test]
    async fn malformed_assignments_rejected() {
        let node = transform(json!({"assignments": [1, 2]}));
        let inputs = inputs_with(&[], &[]);
        assert!(TransformExecutor.execute(&node, &inputs).await.is_err());

        let node = transform(json!({"assignments": {"k": 42}}));
        assert!(TransformExecutor.execute(&node, &inputs).await.is_err());
    }
}
