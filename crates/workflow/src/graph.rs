//! Dependency graph analysis over a workflow definition.
//!
//! Loop edges are excluded from the structural graph: they are evaluated
//! dynamically by the scheduler and must not affect topological ordering.

use std::collections::HashMap;

use mbflow_core::{EdgeId, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::definition::Workflow;
use crate::error::GraphError;

/// Adjacency view of a workflow's structural (non-loop) edges.
///
/// Construction validates the graph: dangling edges, cycles on the
/// structural subgraph, and orphaned nodes are all rejected.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, EdgeId>,
    indices: HashMap<NodeId, NodeIndex>,
    /// Node IDs in workflow insertion order, the deterministic tiebreak
    /// for wave ordering.
    node_order: Vec<NodeId>,
    loop_edges: Vec<EdgeId>,
}

impl DependencyGraph {
    /// Build and validate the dependency graph for a workflow.
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut node_order = Vec::with_capacity(workflow.nodes.len());

        for node in &workflow.nodes {
            let idx = graph.add_node(node.id);
            indices.insert(node.id, idx);
            node_order.push(node.id);
        }

        let mut loop_edges = Vec::new();
        for edge in &workflow.edges {
            let source = *indices.get(&edge.source).ok_or(GraphError::DanglingEdge {
                edge: edge.id,
                node: edge.source,
            })?;
            let target = *indices.get(&edge.target).ok_or(GraphError::DanglingEdge {
                edge: edge.id,
                node: edge.target,
            })?;

            if edge.is_structural() {
                graph.add_edge(source, target, edge.id);
            } else {
                loop_edges.push(edge.id);
            }
        }

        let dep_graph = Self {
            graph,
            indices,
            node_order,
            loop_edges,
        };

        if let Some(path) = dep_graph.find_cycle() {
            return Err(GraphError::CycleDetected { path });
        }

        // Orphans: no structural edges at all. Start markers and the
        // single-node workflow are exempt.
        if workflow.nodes.len() > 1 {
            for node in &workflow.nodes {
                let idx = dep_graph.indices[&node.id];
                let disconnected = dep_graph
                    .graph
                    .neighbors_undirected(idx)
                    .next()
                    .is_none();
                if disconnected && !node.kind.is_start() {
                    return Err(GraphError::OrphanNode {
                        node: node.id,
                        name: node.name.clone(),
                    });
                }
            }
        }

        Ok(dep_graph)
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    /// Edge IDs of loop edges (excluded from the structural graph).
    #[must_use]
    pub fn loop_edges(&self) -> &[EdgeId] {
        &self.loop_edges
    }

    /// Direct predecessors of `node` over structural edges, in insertion
    /// order.
    #[must_use]
    pub fn predecessors(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Incoming)
    }

    /// Direct successors of `node` over structural edges, in insertion
    /// order.
    #[must_use]
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Outgoing)
    }

    /// Nodes with no structural predecessors, in insertion order.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.node_order
            .iter()
            .copied()
            .filter(|id| self.predecessors(*id).is_empty())
            .collect()
    }

    /// Nodes with no structural successors, in insertion order.
    #[must_use]
    pub fn exit_nodes(&self) -> Vec<NodeId> {
        self.node_order
            .iter()
            .copied()
            .filter(|id| self.successors(*id).is_empty())
            .collect()
    }

    /// Compute Kahn levels: level 0 holds every node with indegree 0,
    /// level n+1 holds nodes whose every predecessor sits in levels ≤ n.
    /// Within a level, nodes appear in workflow insertion order.
    #[must_use]
    pub fn compute_levels(&self) -> Vec<Vec<NodeId>> {
        let mut indegree: HashMap<NodeId, usize> = self
            .node_order
            .iter()
            .map(|id| (*id, self.predecessors(*id).len()))
            .collect();

        let mut levels = Vec::new();
        let mut remaining: Vec<NodeId> = self.node_order.clone();

        while !remaining.is_empty() {
            let ready: Vec<NodeId> = remaining
                .iter()
                .copied()
                .filter(|id| indegree[id] == 0)
                .collect();
            // Construction rejected cycles, so progress is guaranteed.
            debug_assert!(!ready.is_empty());
            if ready.is_empty() {
                break;
            }

            for id in &ready {
                for succ in self.successors(*id) {
                    if let Some(d) = indegree.get_mut(&succ) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
            remaining.retain(|id| !ready.contains(id));
            levels.push(ready);
        }

        levels
    }

    fn neighbors(&self, node: NodeId, direction: Direction) -> Vec<NodeId> {
        let Some(&idx) = self.indices.get(&node) else {
            return Vec::new();
        };
        let mut out: Vec<NodeId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n])
            .collect();
        // petgraph iterates neighbors in reverse insertion order; normalize
        // to workflow insertion order for determinism.
        out.sort_by_key(|id| self.node_order.iter().position(|n| n == id));
        out.dedup();
        out
    }

    /// Find one cycle in the structural graph, returned as a node path.
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        fn visit(
            graph: &DiGraph<NodeId, EdgeId>,
            idx: NodeIndex,
            marks: &mut HashMap<NodeIndex, Mark>,
            stack: &mut Vec<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            marks.insert(idx, Mark::Grey);
            stack.push(idx);

            for next in graph.neighbors_directed(idx, Direction::Outgoing) {
                match marks.get(&next).copied().unwrap_or(Mark::White) {
                    Mark::Grey => {
                        let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut path: Vec<NodeIndex> = stack[start..].to_vec();
                        path.push(next);
                        return Some(path);
                    }
                    Mark::White => {
                        if let Some(path) = visit(graph, next, marks, stack) {
                            return Some(path);
                        }
                    }
                    Mark::Black => {}
                }
            }

            stack.pop();
            marks.insert(idx, Mark::Black);
            None
        }

        let mut marks = HashMap::new();
        for &start in self.indices.values() {
            if marks.get(&start).copied().unwrap_or(Mark::White) == Mark::White {
                let mut stack = Vec::new();
                if let Some(path) = visit(&self.graph, start, &mut marks, &mut stack) {
                    return Some(path.into_iter().map(|idx| self.graph[idx]).collect());
                }
            }
        }
        None
    }
}
