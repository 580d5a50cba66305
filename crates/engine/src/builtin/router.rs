//! The conditional router node.
//!
//! Configuration:
//! - `routes`: object of `route name → condition`, evaluated in
//!   declaration order; the first condition that holds selects the route.
//! - `default`: route name taken when no condition matches.
//!
//! The selected route's name is written to `selected_route` in the node's
//! output; conditional edges out of the router typically test it.
//! Evaluation errors fail the node; routers get no false-downgrade.

use async_trait::async_trait;
use mbflow_execution::VariableSet;
use mbflow_workflow::NodeDefinition;
use serde_json::Value;

use crate::conditions::select_route;
use crate::executor::{NodeError, NodeExecutionInputs, NodeExecutor};

/// Output key carrying the selected route name.
pub const SELECTED_ROUTE_KEY: &str = "selected_route";

/// Routes control flow by evaluating an ordered condition table.
#[derive(Debug, Default)]
pub struct RouterExecutor;

#[async_trait]
impl NodeExecutor for RouterExecutor {
    async fn execute(
        &self,
        node: &NodeDefinition,
        inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        let Some(routes) = node.config.get("routes").and_then(Value::as_object) else {
            return Err(NodeError::fatal("router: missing routes table"));
        };

        let mut table: Vec<(&str, &str)> = Vec::with_capacity(routes.len());
        for (name, condition) in routes {
            let Some(condition) = condition.as_str() else {
                return Err(NodeError::fatal(format!(
                    "router: route {name:?} must map to a condition string"
                )));
            };
            table.push((name.as_str(), condition));
        }

        let default_route = node.config.get("default").and_then(Value::as_str);
        let ctx = inputs.evaluation_context();

        let selected = select_route(table, default_route, &ctx)
            .map_err(|err| NodeError::fatal(format!("router: {err}")))?;

        let mut output = VariableSet::new();
        let _ = output.insert(SELECTED_ROUTE_KEY, Value::String(selected.to_string()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbflow_core::{ExecutionId, NodeId, WorkflowId};
    use mbflow_workflow::NodeKind;
    use serde_json::json;
    use std::collections::HashMap;

    fn router(config: Value) -> NodeDefinition {
        let mut node = NodeDefinition::new(NodeId::v4(), NodeKind::router(), "router");
        if let Value::Object(map) = config {
            node.config = map;
        }
        node
    }

    fn inputs_with(global: &[(&str, Value)]) -> NodeExecutionInputs {
        let mut global_set = VariableSet::new();
        for (k, v) in global {
            global_set.insert((*k).to_string(), v.clone()).unwrap();
        }
        global_set.freeze();
        NodeExecutionInputs {
            execution_id: ExecutionId::v4(),
            workflow_id: WorkflowId::v4(),
            node_id: NodeId::v4(),
            variables: VariableSet::new(),
            global: global_set,
            parent_outputs: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn selects_first_matching_route() {
        let node = router(json!({
            "routes": {"high": "score >= 80", "low": "score < 80"},
            "default": "low"
        }));
        let inputs = inputs_with(&[("score", json!(91))]);

        let output = RouterExecutor.execute(&node, &inputs).await.unwrap();
        assert_eq!(output.get(SELECTED_ROUTE_KEY), Some(&json!("high")));
    }

    #[tokio::test]
    async fn falls_back_to_default() {
        let node = router(json!({
            "routes": {"high": "score >= 80"},
            "default": "low"
        }));
        let inputs = inputs_with(&[("score", json!(72))]);

        let output = RouterExecutor.execute(&node, &inputs).await.unwrap();
        assert_eq!(output.get(SELECTED_ROUTE_KEY), Some(&json!("low")));
    }

    #[tokio::test]
    async fn missing_routes_table_is_fatal() {
        let node = router(json!({}));
        let inputs = inputs_with(&[]);
        let err = RouterExecutor.execute(&node, &inputs).await.unwrap_err();
        assert!(err.to_string().contains("routes"));
    }

    #[tokio::test]
    async fn evaluation_error_fails_the_node() {
        let node = router(json!({
            "routes": {"r": "unbound > 1"},
            "default": "d"
        }));
        let inputs = inputs_with(&[]);
        let err = RouterExecutor.execute(&node, &inputs).await.unwrap_err();
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("unbound"));
    }

    #[tokio::test]
    async fn non_string_condition_is_fatal() {
        let node = router(json!({
            "routes": {"r": 42},
            "default": "d"
        }));
        let inputs = inputs_with(&[]);
        assert!(RouterExecutor.execute(&node, &inputs).await.is_err());
    }
}
