//! Execution planning: compiles a workflow into an ordered wave schedule.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mbflow_core::{EdgeId, NodeId, WorkflowId};
use mbflow_workflow::{
    DependencyGraph, EdgeKind, GraphError, JoinStrategy, Workflow, WorkflowError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while compiling an execution plan. All are fatal; the
/// engine refuses to start.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The definition violates an aggregate invariant.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The dependency graph is invalid (cycle, orphan, dangling edge).
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Two join edges into the same target declare different strategies.
    #[error("conflicting join strategies declared for node {node}")]
    JoinStrategyConflict {
        /// The join target with conflicting declarations.
        node: NodeId,
    },
}

/// The fan-in contract compiled for one join target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// The release strategy (WaitAll when none was declared).
    pub strategy: JoinStrategy,
    /// The incoming join edges, in workflow order.
    pub edges: Vec<EdgeId>,
}

/// A loop edge the scheduler evaluates at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSpec {
    /// The loop edge.
    pub edge: EdgeId,
    /// The node whose completion fires the loop.
    pub source: NodeId,
    /// The node re-admitted for another iteration.
    pub target: NodeId,
    /// Maximum number of re-admissions.
    pub max_iterations: u32,
}

/// A compiled, immutable execution plan.
///
/// Compilation is pure: compiling the same workflow twice yields the same
/// waves, indices, and join specs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Workflow this plan was compiled from.
    pub workflow_id: WorkflowId,
    /// Waves of nodes eligible to run concurrently, in execution order.
    /// Within a wave, nodes appear in workflow insertion order.
    pub waves: Vec<Vec<NodeId>>,
    /// Outgoing structural edges per node, in workflow order.
    pub successors: HashMap<NodeId, Vec<EdgeId>>,
    /// Incoming structural edges per node, in workflow order.
    pub predecessors: HashMap<NodeId, Vec<EdgeId>>,
    /// Nodes with no structural predecessors.
    pub entry_nodes: Vec<NodeId>,
    /// Join targets and their compiled fan-in contracts.
    pub join_targets: HashMap<NodeId, JoinSpec>,
    /// Loop edges, evaluated dynamically by the scheduler.
    pub loops: Vec<LoopSpec>,
    /// Total number of nodes in the plan.
    pub total_nodes: usize,
    /// When this plan was compiled.
    pub created_at: DateTime<Utc>,
}

/// Default bound applied to loop edges that do not declare one.
const DEFAULT_LOOP_ITERATIONS: u32 = 1;

impl ExecutionPlan {
    /// Compile a workflow into an execution plan.
    pub fn compile(workflow: &Workflow) -> Result<Self, PlanError> {
        workflow.validate()?;
        let graph = DependencyGraph::from_workflow(workflow)?;

        let waves = graph.compute_levels();
        let entry_nodes = graph.entry_nodes();

        let mut successors: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();
        let mut predecessors: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();
        for node in &workflow.nodes {
            successors.insert(node.id, Vec::new());
            predecessors.insert(node.id, Vec::new());
        }

        let mut loops = Vec::new();
        for edge in &workflow.edges {
            if edge.kind == EdgeKind::Loop {
                loops.push(LoopSpec {
                    edge: edge.id,
                    source: edge.source,
                    target: edge.target,
                    max_iterations: edge
                        .config
                        .max_iterations
                        .unwrap_or(DEFAULT_LOOP_ITERATIONS),
                });
                continue;
            }
            if let Some(out) = successors.get_mut(&edge.source) {
                out.push(edge.id);
            }
            if let Some(inc) = predecessors.get_mut(&edge.target) {
                inc.push(edge.id);
            }
        }

        let join_targets = compile_join_targets(workflow)?;

        Ok(Self {
            workflow_id: workflow.id,
            waves,
            successors,
            predecessors,
            entry_nodes,
            join_targets,
            loops,
            total_nodes: workflow.nodes.len(),
            created_at: Utc::now(),
        })
    }

    /// The wave index a node is scheduled in, if any.
    #[must_use]
    pub fn wave_of(&self, node: NodeId) -> Option<usize> {
        self.waves.iter().position(|wave| wave.contains(&node))
    }

    /// Returns `true` if `node` is a join target.
    #[must_use]
    pub fn is_join_target(&self, node: NodeId) -> bool {
        self.join_targets.contains_key(&node)
    }

    /// Loop specs whose source is `node`.
    #[must_use]
    pub fn loops_from(&self, node: NodeId) -> Vec<&LoopSpec> {
        self.loops.iter().filter(|l| l.source == node).collect()
    }
}

/// Collect join targets: every node reachable via at least one join edge.
/// The strategy may be declared on any of its join edges; conflicting
/// declarations are a compile error, no declaration defaults to WaitAll.
fn compile_join_targets(workflow: &Workflow) -> Result<HashMap<NodeId, JoinSpec>, PlanError> {
    let mut targets: HashMap<NodeId, JoinSpec> = HashMap::new();
    let mut declared: HashMap<NodeId, JoinStrategy> = HashMap::new();

    for edge in &workflow.edges {
        if edge.kind != EdgeKind::Join {
            continue;
        }
        let spec = targets.entry(edge.target).or_insert_with(|| JoinSpec {
            strategy: JoinStrategy::default(),
            edges: Vec::new(),
        });
        spec.edges.push(edge.id);

        if let Some(strategy) = edge.config.join_strategy {
            match declared.get(&edge.target) {
                Some(existing) if *existing != strategy => {
                    return Err(PlanError::JoinStrategyConflict { node: edge.target });
                }
                _ => {
                    declared.insert(edge.target, strategy);
                    spec.strategy = strategy;
                }
            }
        }
    }

    Ok(targets)
}
