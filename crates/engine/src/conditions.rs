//! Edge-condition and router-route evaluation against the variable store.

use mbflow_execution::VariableStore;
use mbflow_expression::{EvaluationContext, Expression, ExpressionError, ExpressionResult};
use mbflow_workflow::EdgeDefinition;

/// Build the context an edge condition sees: the flattened execution
/// variables (global + execution scope) plus the source node's outputs.
#[must_use]
pub fn edge_context(store: &VariableStore, source: mbflow_core::NodeId) -> EvaluationContext {
    let mut ctx = EvaluationContext::new();
    let flattened = store.flattened();
    ctx.layer(flattened.iter());
    if let Some(output) = store.node_output(source) {
        ctx.layer(output.iter());
    }
    ctx
}

/// Evaluate an edge's condition. Edges without a condition are always
/// activated. Evaluation errors propagate so the scheduler can downgrade
/// them to `false` with a warning event.
pub fn evaluate_edge(edge: &EdgeDefinition, store: &VariableStore) -> ExpressionResult<bool> {
    let Some(condition) = &edge.config.condition else {
        return Ok(true);
    };
    let ctx = edge_context(store, edge.source);
    Expression::parse(condition.as_str())?.evaluate_bool(&ctx)
}

/// Select a route from an ordered `name → condition` table.
///
/// Conditions are evaluated in declaration order; the first that holds
/// wins. When none match, the default route is taken. Evaluation errors
/// are fatal for routers.
pub fn select_route<'a>(
    routes: impl IntoIterator<Item = (&'a str, &'a str)>,
    default_route: Option<&'a str>,
    ctx: &EvaluationContext,
) -> ExpressionResult<&'a str> {
    for (name, condition) in routes {
        if Expression::parse(condition)?.evaluate_bool(ctx)? {
            return Ok(name);
        }
    }
    default_route.ok_or_else(|| {
        ExpressionError::type_mismatch("a matching route or a default route", "no match")
    })
}
