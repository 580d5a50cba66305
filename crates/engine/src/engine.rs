//! The wave scheduler: MBFlow's central control loop.
//!
//! Executes a compiled plan wave by wave, dispatching eligible nodes in
//! parallel with bounded concurrency, funnelling results back into the
//! execution aggregate and the join coordinator, and broadcasting
//! observer notifications.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use mbflow_core::{EdgeId, ExecutionId, NodeId};
use mbflow_events::{EventStore, Notification, ObserverFanout, Observer};
use mbflow_execution::{
    Execution, ExecutionError, ExecutionPlan, NodeStatus, SharedExecution, VariableSet,
};
use mbflow_resilience::{BreakerTransition, CircuitBreaker, RetryPolicy};
use mbflow_workflow::{
    EdgeDefinition, EdgeKind, NodeDefinition, NodeKind, TriggerDefinition, Workflow,
};
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::binder::VariableBinder;
use crate::conditions::evaluate_edge;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{NodeError, NodeExecutionInputs, NodeExecutor};
use crate::joins::{BranchStatus, JoinCoordinator, JoinDecision};
use crate::registry::ExecutorRegistry;
use crate::report::ExecutionReport;

/// The MBFlow workflow execution engine.
///
/// One engine instance executes one workflow instance at a time per
/// `execute` call; circuit breakers are keyed by node kind and shared
/// across calls, so repeated failures of a kind trip the breaker for
/// subsequent executions.
pub struct WorkflowEngine {
    registry: Arc<ExecutorRegistry>,
    event_store: Arc<dyn EventStore>,
    fanout: Arc<RwLock<ObserverFanout>>,
    breakers: DashMap<NodeKind, Arc<CircuitBreaker>>,
    config: EngineConfig,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        registry: ExecutorRegistry,
        event_store: Arc<dyn EventStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            event_store,
            fanout: Arc::new(RwLock::new(ObserverFanout::new())),
            breakers: DashMap::new(),
            config,
        }
    }

    /// Register a lifecycle observer. Must be called from within a tokio
    /// runtime (the observer's drain task starts immediately).
    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.fanout.write().register(observer);
    }

    /// Execute a workflow to a terminal phase and return its report.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        trigger: &TriggerDefinition,
        initial_variables: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ExecutionReport, EngineError> {
        let started = Instant::now();
        let plan = ExecutionPlan::compile(workflow)?;

        // Fail before starting if any node kind has no executor.
        for node in &workflow.nodes {
            self.registry.get(&node.kind)?;
        }

        let execution = Execution::new(ExecutionId::v4(), workflow.id).into_shared();
        self.run(workflow, trigger, initial_variables, &plan, execution.clone(), started)
            .await?;

        let report = {
            let execution = execution.read();
            ExecutionReport::from_execution(&execution, started.elapsed())
        };
        Ok(report)
    }

    /// Async mode: start the execution and return immediately with the
    /// shared aggregate and a handle resolving to the final report.
    #[must_use]
    pub fn execute_with_handle(
        self: &Arc<Self>,
        workflow: Arc<Workflow>,
        trigger: TriggerDefinition,
        initial_variables: serde_json::Map<String, serde_json::Value>,
    ) -> (
        SharedExecution,
        tokio::task::JoinHandle<Result<ExecutionReport, EngineError>>,
    ) {
        let execution = Execution::new(ExecutionId::v4(), workflow.id).into_shared();
        let engine = Arc::clone(self);
        let shared = execution.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let plan = ExecutionPlan::compile(&workflow)?;
            for node in &workflow.nodes {
                engine.registry.get(&node.kind)?;
            }
            engine
                .run(&workflow, &trigger, initial_variables, &plan, execution.clone(), started)
                .await?;
            let report = {
                let execution = execution.read();
                ExecutionReport::from_execution(&execution, started.elapsed())
            };
            Ok(report)
        });
        (shared, handle)
    }

    /// The breaker guarding a node kind, created on first use.
    fn breaker_for(&self, kind: &NodeKind) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(kind.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.breaker.clone())))
            .clone()
    }

    /// Drive an execution from Start to a terminal phase.
    #[allow(clippy::too_many_lines)]
    async fn run(
        &self,
        workflow: &Workflow,
        trigger: &TriggerDefinition,
        initial_variables: serde_json::Map<String, serde_json::Value>,
        plan: &ExecutionPlan,
        execution: SharedExecution,
        started: Instant,
    ) -> Result<(), EngineError> {
        let gate = Arc::new(CommandGate {
            execution: execution.clone(),
            store: self.event_store.clone(),
            fanout: self.fanout.clone(),
            lock: tokio::sync::Mutex::new(()),
        });
        let execution_id = execution.read().id();
        let workflow_id = workflow.id;

        // 1. Start: seed and freeze the global context.
        gate.command(
            |e| e.start(trigger.id, initial_variables),
            |_| {
                vec![Notification::ExecutionStarted {
                    execution_id,
                    workflow_id,
                }]
            },
        )
        .await?;

        // 2. Per-run coordination state.
        let joins = JoinCoordinator::from_plan(plan);
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_nodes.max(1)));
        let mut activation: HashMap<EdgeId, bool> = HashMap::new();
        let mut loop_counts: HashMap<EdgeId, u32> = HashMap::new();

        let watchdog = self.config.execution_timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(?timeout, "execution timeout elapsed; cancelling");
                cancel.cancel();
            })
        });

        // 3. Drain waves. Loop re-admissions are inserted as dynamic waves
        //    directly after the wave that fired them.
        let mut queue: VecDeque<(Vec<NodeId>, bool)> =
            plan.waves.iter().map(|w| (w.clone(), false)).collect();
        let mut aborted: Option<(NodeId, String)> = None;

        'waves: while let Some((wave, readmission)) = queue.pop_front() {
            if cancel.is_cancelled() {
                break;
            }
            debug!(nodes = wave.len(), readmission, "admitting wave");

            // 3a. Effective set: drop settled nodes and unsatisfied joins.
            let mut runnable: Vec<&NodeDefinition> = Vec::new();
            for node_id in &wave {
                let Some(node) = workflow.node(*node_id) else {
                    continue;
                };
                let status = execution.read().node_status(*node_id);
                if status == NodeStatus::Running {
                    continue;
                }
                if status.is_terminal() && !readmission {
                    continue;
                }

                if joins.is_join_target(*node_id) {
                    match joins.decision(*node_id) {
                        JoinDecision::Release => {}
                        JoinDecision::Skip | JoinDecision::StillPending => {
                            // Every branch has settled by the wave barrier,
                            // so anything short of Release is unsatisfiable.
                            self.skip_and_mark(
                                &gate, plan, workflow, &joins, &mut activation, node,
                                "join strategy not satisfied",
                            )
                            .await?;
                            continue;
                        }
                    }
                } else if !plan.predecessors.get(node_id).is_none_or(Vec::is_empty) {
                    let has_activated = plan.predecessors[node_id]
                        .iter()
                        .any(|edge| activation.get(edge).copied().unwrap_or(false));
                    if !has_activated {
                        self.skip_and_mark(
                            &gate, plan, workflow, &joins, &mut activation, node,
                            "no activated incoming edge",
                        )
                        .await?;
                        continue;
                    }
                }

                runnable.push(node);
            }

            // 3b. Bind inputs and spawn the wave.
            let mut join_set: JoinSet<(NodeId, NodeOutcome)> = JoinSet::new();
            for node in runnable {
                let activated_edges: Vec<&EdgeDefinition> = plan
                    .predecessors
                    .get(&node.id)
                    .into_iter()
                    .flatten()
                    .filter(|edge| activation.get(*edge).copied().unwrap_or(false))
                    .filter_map(|edge| workflow.edge(*edge))
                    .collect();

                let bound = {
                    let execution = execution.read();
                    VariableBinder::bind(
                        workflow,
                        node,
                        &activated_edges,
                        execution.store(),
                        execution.id(),
                    )
                };

                match bound {
                    Ok(inputs) => {
                        let task = NodeTask {
                            node: node.clone(),
                            inputs,
                            executor: self.registry.get(&node.kind)?,
                            breaker: self.breaker_for(&node.kind),
                            gate: gate.clone(),
                            retry: self.config.retry.clone(),
                            timeout: self.config.node_timeout(node),
                            cancel: cancel.clone(),
                            semaphore: semaphore.clone(),
                            execution_id,
                        };
                        join_set.spawn(task.run());
                    }
                    Err(err) => {
                        // Binding failures fail the node without invoking
                        // the executor; the node still settles via events.
                        let message = err.to_string();
                        self.fail_without_run(&gate, node, &message, execution_id)
                            .await?;
                        let outcome = self
                            .settle_failure(
                                &gate, plan, workflow, &joins, &mut activation,
                                node.id, &message, &execution,
                            )
                            .await?;
                        if let Some(abort) = outcome {
                            aborted = Some(abort);
                            cancel.cancel();
                        }
                    }
                }
            }

            // 3c. Wave barrier: collect every spawned node. Once the run
            // is cancelled, in-flight nodes get the grace period to settle
            // before being abandoned.
            let mut readmit: Vec<NodeId> = Vec::new();
            loop {
                let joined = if cancel.is_cancelled() {
                    match tokio::time::timeout(
                        self.config.cancellation_grace,
                        join_set.join_next(),
                    )
                    .await
                    {
                        Ok(joined) => joined,
                        Err(_elapsed) => {
                            warn!("cancellation grace elapsed; abandoning in-flight nodes");
                            join_set.abort_all();
                            while join_set.join_next().await.is_some() {}
                            None
                        }
                    }
                } else {
                    join_set.join_next().await
                };
                let Some(joined) = joined else { break };

                let (node_id, outcome) = match joined {
                    Ok(pair) => pair,
                    Err(join_err) if join_err.is_cancelled() => continue,
                    Err(join_err) => {
                        warn!(?join_err, "node task panicked");
                        aborted = Some((NodeId::nil(), format!("node task panicked: {join_err}")));
                        cancel.cancel();
                        continue;
                    }
                };

                match outcome {
                    NodeOutcome::Completed => {
                        let fired = self.settle_completion(
                            plan, workflow, &joins, &mut activation, &mut loop_counts,
                            node_id, &execution, &gate,
                        )
                        .await?;
                        readmit.extend(fired);
                    }
                    NodeOutcome::Failed { error } => {
                        let abort = self
                            .settle_failure(
                                &gate, plan, workflow, &joins, &mut activation,
                                node_id, &error, &execution,
                            )
                            .await?;
                        if let Some(abort) = abort {
                            aborted = Some(abort);
                            cancel.cancel();
                        }
                    }
                    NodeOutcome::Cancelled => {}
                    NodeOutcome::Fault(err) => {
                        cancel.cancel();
                        // Drain remaining tasks before surfacing the fault.
                        while join_set.join_next().await.is_some() {}
                        if let Some(watchdog) = &watchdog {
                            watchdog.abort();
                        }
                        return Err(err);
                    }
                }
            }

            if aborted.is_some() {
                break 'waves;
            }
            if !readmit.is_empty() {
                queue.push_front((readmit, true));
            }
        }

        if let Some(watchdog) = &watchdog {
            watchdog.abort();
        }

        // 4. Finalize.
        if let Some((node_id, error)) = aborted {
            let duration = started.elapsed();
            gate.command(
                |e| e.fail(&error, Some(node_id).filter(|id| !id.is_nil())),
                |_| {
                    vec![Notification::ExecutionFailed {
                        execution_id,
                        error: error.clone(),
                        duration,
                    }]
                },
            )
            .await?;
            return Ok(());
        }

        if cancel.is_cancelled() {
            return self
                .finalize_cancelled(&gate, workflow, &execution, execution_id, started)
                .await;
        }

        // Success: the union of all per-node outputs, in workflow node
        // order (later nodes overwrite earlier keys).
        let final_variables = {
            let execution = execution.read();
            let mut merged = serde_json::Map::new();
            for node in &workflow.nodes {
                if let Some(output) = execution.store().node_output(node.id) {
                    for (key, value) in output.iter() {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            merged
        };
        let duration = started.elapsed();
        gate.command(
            |e| e.complete(final_variables),
            |_| {
                vec![Notification::ExecutionCompleted {
                    execution_id,
                    duration,
                }]
            },
        )
        .await?;
        Ok(())
    }

    /// Skip a node and deactivate its outgoing edges; joins downstream
    /// receive a Skipped signal for the affected branches.
    async fn skip_and_mark(
        &self,
        gate: &Arc<CommandGate>,
        plan: &ExecutionPlan,
        workflow: &Workflow,
        joins: &JoinCoordinator,
        activation: &mut HashMap<EdgeId, bool>,
        node: &NodeDefinition,
        reason: &str,
    ) -> Result<(), EngineError> {
        debug!(node = %node.name, reason, "skipping node");
        let name = node.name.clone();
        let id = node.id;
        gate.command(|e| e.skip_node(id, &name, reason), |_| Vec::new())
            .await?;
        mark_successors(plan, workflow, joins, activation, id, BranchStatus::Skipped);
        Ok(())
    }

    /// Record a node failure that happened before the executor could run
    /// (binding errors): the node passes through Running so the failure
    /// lands in the event stream.
    async fn fail_without_run(
        &self,
        gate: &Arc<CommandGate>,
        node: &NodeDefinition,
        error: &str,
        execution_id: ExecutionId,
    ) -> Result<(), EngineError> {
        let (id, name, kind) = (node.id, node.name.clone(), node.kind.to_string());
        gate.command(
            |e| e.start_node(id, &name, &kind, serde_json::Map::new()),
            |_| {
                vec![Notification::NodeStarted {
                    execution_id,
                    node_id: id,
                    node_name: name.clone(),
                    attempt: 0,
                }]
            },
        )
        .await?;
        gate.command(
            |e| e.fail_node(id, &name, &kind, error, 0),
            |_| {
                vec![Notification::NodeFailed {
                    execution_id,
                    node_id: id,
                    node_name: name.clone(),
                    error: error.to_string(),
                    duration: Duration::ZERO,
                    will_retry: false,
                }]
            },
        )
        .await?;
        Ok(())
    }

    /// Post-completion bookkeeping: evaluate outgoing conditions, signal
    /// joins, and fire loop edges. Returns the nodes to re-admit.
    #[allow(clippy::too_many_arguments)]
    async fn settle_completion(
        &self,
        plan: &ExecutionPlan,
        workflow: &Workflow,
        joins: &JoinCoordinator,
        activation: &mut HashMap<EdgeId, bool>,
        loop_counts: &mut HashMap<EdgeId, u32>,
        node_id: NodeId,
        execution: &SharedExecution,
        gate: &Arc<CommandGate>,
    ) -> Result<Vec<NodeId>, EngineError> {
        // Outgoing structural edges: evaluate conditions against the
        // current store; errors downgrade to false with a warning event.
        for edge_id in plan.successors.get(&node_id).into_iter().flatten() {
            let Some(edge) = workflow.edge(*edge_id) else {
                continue;
            };
            let evaluated = {
                let execution = execution.read();
                evaluate_edge(edge, execution.store())
            };
            let activated = match evaluated {
                Ok(result) => result,
                Err(err) => {
                    warn!(edge = %edge.id, error = %err, "condition downgraded to false");
                    let (edge_id, message) = (edge.id, err.to_string());
                    gate.command(|e| e.warn_condition(edge_id, &message), |_| Vec::new())
                        .await?;
                    false
                }
            };
            activation.insert(edge.id, activated);
            if edge.kind == EdgeKind::Join {
                let status = if activated {
                    BranchStatus::Completed
                } else {
                    BranchStatus::Skipped
                };
                joins.signal(edge.target, edge.id, status);
            }
        }

        // Loop edges fire out of band, bounded by their iteration limit.
        let mut readmit = Vec::new();
        for spec in plan.loops_from(node_id) {
            let count = loop_counts.entry(spec.edge).or_insert(0);
            if *count >= spec.max_iterations {
                continue;
            }
            let fire = match workflow.edge(spec.edge) {
                Some(edge) => {
                    let evaluated = {
                        let execution = execution.read();
                        evaluate_edge(edge, execution.store())
                    };
                    match evaluated {
                        Ok(result) => result,
                        Err(err) => {
                            let (edge_id, message) = (spec.edge, err.to_string());
                            gate.command(|e| e.warn_condition(edge_id, &message), |_| Vec::new())
                                .await?;
                            false
                        }
                    }
                }
                None => false,
            };
            if fire {
                *count += 1;
                debug!(node = %spec.target, iteration = *count, "loop edge fired");
                readmit.push(spec.target);
            }
        }
        Ok(readmit)
    }

    /// Post-failure bookkeeping: consult the error strategy, mark branches
    /// so joins still progress, and decide whether to abort.
    #[allow(clippy::too_many_arguments)]
    async fn settle_failure(
        &self,
        _gate: &Arc<CommandGate>,
        plan: &ExecutionPlan,
        workflow: &Workflow,
        joins: &JoinCoordinator,
        activation: &mut HashMap<EdgeId, bool>,
        node_id: NodeId,
        error: &str,
        execution: &SharedExecution,
    ) -> Result<Option<(NodeId, String)>, EngineError> {
        let (completed, failed) = {
            let execution = execution.read();
            let completed = execution
                .node_states()
                .values()
                .filter(|s| s.status == NodeStatus::Completed)
                .count();
            let failed = execution
                .node_states()
                .values()
                .filter(|s| s.status == NodeStatus::Failed)
                .count();
            (completed, failed)
        };

        if self
            .config
            .error_strategy
            .should_abort(completed, failed, plan.total_nodes)
        {
            return Ok(Some((node_id, error.to_string())));
        }

        // Tolerated: downstream joins see the failed branch.
        mark_successors(plan, workflow, joins, activation, node_id, BranchStatus::Failed);
        Ok(None)
    }

    /// Cancellation epilogue: settle what is left and fail the execution.
    async fn finalize_cancelled(
        &self,
        gate: &Arc<CommandGate>,
        workflow: &Workflow,
        execution: &SharedExecution,
        execution_id: ExecutionId,
        started: Instant,
    ) -> Result<(), EngineError> {
        for node in &workflow.nodes {
            let status = execution.read().node_status(node.id);
            let (id, name, kind) = (node.id, node.name.clone(), node.kind.to_string());
            match status {
                NodeStatus::Pending => {
                    gate.command(|e| e.skip_node(id, &name, "cancelled"), |_| Vec::new())
                        .await?;
                }
                // A node abandoned past the grace period.
                NodeStatus::Running => {
                    gate.command(|e| e.fail_node(id, &name, &kind, "cancelled", 0), |_| Vec::new())
                        .await?;
                }
                _ => {}
            }
        }

        let duration = started.elapsed();
        gate.command(
            |e| e.fail("execution cancelled", None),
            |_| {
                vec![Notification::ExecutionFailed {
                    execution_id,
                    error: "execution cancelled".into(),
                    duration,
                }]
            },
        )
        .await?;
        Ok(())
    }
}

/// Deactivate a settled node's outgoing edges and signal downstream
/// joins with the branch status.
fn mark_successors(
    plan: &ExecutionPlan,
    workflow: &Workflow,
    joins: &JoinCoordinator,
    activation: &mut HashMap<EdgeId, bool>,
    node_id: NodeId,
    status: BranchStatus,
) {
    for edge_id in plan.successors.get(&node_id).into_iter().flatten() {
        activation.insert(*edge_id, false);
        if let Some(edge) = workflow.edge(*edge_id)
            && edge.kind == EdgeKind::Join
        {
            joins.signal(edge.target, *edge_id, status);
        }
    }
}

/// Serializes aggregate commands with event persistence and observer
/// notification, so events reach the store and observers in sequence
/// order even when issued from concurrent node tasks.
struct CommandGate {
    execution: SharedExecution,
    store: Arc<dyn EventStore>,
    fanout: Arc<RwLock<ObserverFanout>>,
    lock: tokio::sync::Mutex<()>,
}

impl CommandGate {
    async fn command<R>(
        &self,
        command: impl FnOnce(&mut Execution) -> Result<R, ExecutionError>,
        notifications: impl FnOnce(&R) -> Vec<Notification>,
    ) -> Result<R, EngineError> {
        let _guard = self.lock.lock().await;
        let (result, events) = {
            let mut execution = self.execution.write();
            let result = command(&mut execution)?;
            (result, execution.take_uncommitted())
        };
        self.store.append_batch(events).await?;
        {
            let fanout = self.fanout.read();
            for notification in notifications(&result) {
                fanout.publish(&notification);
            }
        }
        Ok(result)
    }
}

/// What one node task resolved to.
enum NodeOutcome {
    /// The node completed; its output is already recorded in the
    /// aggregate.
    Completed,
    /// The node failed terminally (retries exhausted, breaker open,
    /// fatal executor error, or timeout).
    Failed { error: String },
    /// The execution was cancelled while the node ran or waited.
    Cancelled,
    /// An internal engine failure (event persistence, aggregate bug).
    Fault(EngineError),
}

/// Bundled parameters for a single node execution task.
struct NodeTask {
    node: NodeDefinition,
    inputs: NodeExecutionInputs,
    executor: Arc<dyn NodeExecutor>,
    breaker: Arc<CircuitBreaker>,
    gate: Arc<CommandGate>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
    execution_id: ExecutionId,
}

impl NodeTask {
    /// Execute this node: acquire a slot, run the retry/breaker pipeline,
    /// and settle the node in the aggregate.
    async fn run(self) -> (NodeId, NodeOutcome) {
        let node_id = self.node.id;
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return (node_id, NodeOutcome::Cancelled);
        };
        if self.cancel.is_cancelled() {
            // Never started: the scheduler skips it during finalization.
            return (node_id, NodeOutcome::Cancelled);
        }

        let outcome = self.run_inner().await;
        (node_id, outcome)
    }

    async fn run_inner(&self) -> NodeOutcome {
        let (id, name, kind) = (
            self.node.id,
            self.node.name.clone(),
            self.node.kind.to_string(),
        );
        let execution_id = self.execution_id;
        let inputs_map = self.inputs.variables.to_json_map();

        let started = self
            .gate
            .command(
                |e| e.start_node(id, &name, &kind, inputs_map),
                |_| {
                    vec![Notification::NodeStarted {
                        execution_id,
                        node_id: id,
                        node_name: name.clone(),
                        attempt: 0,
                    }]
                },
            )
            .await;
        if let Err(err) = started {
            return NodeOutcome::Fault(err);
        }

        let node_started = Instant::now();
        let mut attempt: u32 = 1;
        loop {
            // Fast-fail while the breaker is open; the executor is never
            // invoked and the rejection does not feed the failure count.
            if let Err(breaker_err) = self.breaker.try_acquire() {
                let message = breaker_err.to_string();
                return self
                    .settle_failed(&message, attempt - 1, node_started.elapsed())
                    .await;
            }

            let attempt_started = Instant::now();
            let result = self.invoke_executor().await;
            let attempt_duration = attempt_started.elapsed();

            match result {
                Ok(output) => {
                    if let Some(schema) = &self.node.output_schema
                        && let Err(violation) = schema.validate(&output.to_json_map())
                    {
                        let _ = self.breaker.on_failure();
                        let message = format!("output validation failed: {violation}");
                        return self
                            .settle_failed(&message, attempt - 1, node_started.elapsed())
                            .await;
                    }

                    if self.breaker.on_success() == Some(BreakerTransition::Closed) {
                        let kind = kind.clone();
                        let note = self
                            .gate
                            .command(|e| e.note_circuit_closed(&kind), |_| Vec::new())
                            .await;
                        if let Err(err) = note {
                            return NodeOutcome::Fault(err);
                        }
                    }

                    return self
                        .settle_completed(output, node_started.elapsed(), attempt - 1)
                        .await;
                }
                Err(NodeError::Cancelled) => {
                    let settled = self
                        .gate
                        .command(
                            |e| e.fail_node(id, &name, &kind, "cancelled", attempt - 1),
                            |_| Vec::new(),
                        )
                        .await;
                    if let Err(err) = settled {
                        return NodeOutcome::Fault(err);
                    }
                    return NodeOutcome::Cancelled;
                }
                Err(node_err) => {
                    if self.breaker.on_failure() == Some(BreakerTransition::Opened) {
                        let kind = kind.clone();
                        let note = self
                            .gate
                            .command(|e| e.note_circuit_opened(&kind), |_| Vec::new())
                            .await;
                        if let Err(err) = note {
                            return NodeOutcome::Fault(err);
                        }
                    }

                    if node_err.is_retriable() && !self.retry.is_exhausted(attempt) {
                        let delay = self.retry.delay_for(attempt);
                        let error = node_err.to_string();
                        let next_attempt = attempt + 1;
                        let recorded = self
                            .gate
                            .command(
                                |e| e.retry_node(id, &name, next_attempt, delay),
                                |_| {
                                    vec![
                                        Notification::NodeFailed {
                                            execution_id,
                                            node_id: id,
                                            node_name: name.clone(),
                                            error: error.clone(),
                                            duration: attempt_duration,
                                            will_retry: true,
                                        },
                                        Notification::NodeRetrying {
                                            execution_id,
                                            node_id: id,
                                            node_name: name.clone(),
                                            attempt: next_attempt,
                                            delay,
                                        },
                                    ]
                                },
                            )
                            .await;
                        if let Err(err) = recorded {
                            return NodeOutcome::Fault(err);
                        }

                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = self.cancel.cancelled() => {
                                let settled = self
                                    .gate
                                    .command(
                                        |e| e.fail_node(id, &name, &kind, "cancelled", attempt),
                                        |_| Vec::new(),
                                    )
                                    .await;
                                if let Err(err) = settled {
                                    return NodeOutcome::Fault(err);
                                }
                                return NodeOutcome::Cancelled;
                            }
                        }
                        attempt = next_attempt;
                        continue;
                    }

                    return self
                        .settle_failed(&node_err.to_string(), attempt - 1, node_started.elapsed())
                        .await;
                }
            }
        }
    }

    /// Run the executor under the cancellation signal and the node's
    /// timeout.
    async fn invoke_executor(&self) -> Result<VariableSet, NodeError> {
        match self.timeout {
            Some(timeout) => {
                tokio::select! {
                    result = self.executor.execute(&self.node, &self.inputs) => result,
                    () = self.cancel.cancelled() => Err(NodeError::Cancelled),
                    () = tokio::time::sleep(timeout) => Err(NodeError::Timeout(timeout)),
                }
            }
            None => {
                tokio::select! {
                    result = self.executor.execute(&self.node, &self.inputs) => result,
                    () = self.cancel.cancelled() => Err(NodeError::Cancelled),
                }
            }
        }
    }

    async fn settle_completed(
        &self,
        output: VariableSet,
        duration: Duration,
        retry_count: u32,
    ) -> NodeOutcome {
        let (id, name, kind) = (
            self.node.id,
            self.node.name.clone(),
            self.node.kind.to_string(),
        );
        let execution_id = self.execution_id;
        let output_map = output.to_json_map();
        let output_for_note = output_map.clone();
        let settled = self
            .gate
            .command(
                |e| e.complete_node(id, &name, &kind, output_map, duration, retry_count),
                |_| {
                    vec![Notification::NodeCompleted {
                        execution_id,
                        node_id: id,
                        node_name: name.clone(),
                        output: output_for_note,
                        duration,
                    }]
                },
            )
            .await;
        match settled {
            Ok(_) => NodeOutcome::Completed,
            Err(err) => NodeOutcome::Fault(err),
        }
    }

    async fn settle_failed(
        &self,
        error: &str,
        retry_count: u32,
        duration: Duration,
    ) -> NodeOutcome {
        let (id, name, kind) = (
            self.node.id,
            self.node.name.clone(),
            self.node.kind.to_string(),
        );
        let execution_id = self.execution_id;
        let error_owned = error.to_string();
        let settled = self
            .gate
            .command(
                |e| e.fail_node(id, &name, &kind, error, retry_count),
                |_| {
                    vec![Notification::NodeFailed {
                        execution_id,
                        node_id: id,
                        node_name: name.clone(),
                        error: error_owned.clone(),
                        duration,
                        will_retry: false,
                    }]
                },
            )
            .await;
        match settled {
            Ok(_) => NodeOutcome::Failed { error: error_owned },
            Err(err) => NodeOutcome::Fault(err),
        }
    }
}
