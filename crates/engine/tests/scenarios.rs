//! End-to-end engine scenarios: wave scheduling, binding, joins, retry,
//! circuit breaking, and the event-stream invariants.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mbflow_core::ExecutionId;
use mbflow_engine::{
    EngineConfig, ErrorStrategy, ExecutorRegistry, NodeError, NodeExecutionInputs, NodeExecutor,
    WorkflowEngine,
};
use mbflow_events::{Event, EventStore, EventType, InMemoryEventStore};
use mbflow_execution::{Execution, ExecutionPhase, NodeStatus, VariableSet};
use mbflow_resilience::{BreakerConfig, RetryPolicy};
use mbflow_workflow::{
    EdgeConfig, EdgeKind, JoinStrategy, NodeDefinition, NodeKind, TriggerDefinition, Workflow,
    WorkflowBuilder,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};

// ── helpers ────────────────────────────────────────────────────────────

fn vars(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn transform(name: &str, config: Value) -> NodeDefinition {
    let mut node = NodeDefinition::new(mbflow_core::NodeId::v4(), NodeKind::transform(), name);
    if let Value::Object(map) = config {
        node.config = map;
    }
    node
}

fn engine_with(
    registry: ExecutorRegistry,
    config: EngineConfig,
) -> (Arc<WorkflowEngine>, Arc<InMemoryEventStore>) {
    let store = Arc::new(InMemoryEventStore::new());
    let engine = Arc::new(WorkflowEngine::new(registry, store.clone(), config));
    (engine, store)
}

fn default_engine() -> (Arc<WorkflowEngine>, Arc<InMemoryEventStore>) {
    engine_with(ExecutorRegistry::with_builtins(), EngineConfig::default())
}

async fn events_for(store: &InMemoryEventStore, execution: ExecutionId) -> Vec<Event> {
    store.list_by_execution(execution).await.unwrap()
}

fn event_types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

fn assert_contiguous(events: &[Event]) {
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(sequences, expected, "event sequence must be 1..n contiguous");
}

// ── test executors ─────────────────────────────────────────────────────

/// Fails with a retriable error until `succeed_on_attempt`, then emits
/// `{ok: true}`.
#[derive(Debug)]
struct FlakyExecutor {
    calls: AtomicU32,
    succeed_on_attempt: u32,
}

#[async_trait]
impl NodeExecutor for FlakyExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        _inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.succeed_on_attempt {
            return Err(NodeError::retriable("synthetic transient failure"));
        }
        let mut output = VariableSet::new();
        output.insert("ok", json!(true)).unwrap();
        Ok(output)
    }
}

/// Always fails with a retriable error; counts invocations.
#[derive(Debug)]
struct AlwaysFailExecutor {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl NodeExecutor for AlwaysFailExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        _inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NodeError::retriable("downstream unavailable"))
    }
}

/// Captures the bound input variables it was invoked with.
#[derive(Debug)]
struct CapturingExecutor {
    seen: Arc<Mutex<Option<VariableSet>>>,
}

#[async_trait]
impl NodeExecutor for CapturingExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        *self.seen.lock() = Some(inputs.variables.clone());
        Ok(inputs.variables.clone())
    }
}

/// Sleeps far longer than any test timeout.
#[derive(Debug)]
struct SlowExecutor;

#[async_trait]
impl NodeExecutor for SlowExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        _inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(VariableSet::new())
    }
}

/// Counts invocations and emits the running count.
#[derive(Debug)]
struct CountingExecutor {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl NodeExecutor for CountingExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        _inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut output = VariableSet::new();
        output.insert("count", json!(count)).unwrap();
        Ok(output)
    }
}

/// Fails fatally on every call.
#[derive(Debug)]
struct FatalExecutor;

#[async_trait]
impl NodeExecutor for FatalExecutor {
    async fn execute(
        &self,
        _node: &NodeDefinition,
        _inputs: &NodeExecutionInputs,
    ) -> Result<VariableSet, NodeError> {
        Err(NodeError::fatal("intentional failure"))
    }
}

// ── scenario 1: linear transform chain ─────────────────────────────────

fn linear_chain() -> Workflow {
    let mut b = WorkflowBuilder::new("linear-chain");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let double = transform("double", json!({"assignments": {"result": "input * 2"}}));
    let double_id = double.id;
    b.add_node_definition(double).unwrap();
    let end = transform("end", json!({"passthrough": true}));
    let end_id = end.id;
    b.add_node_definition(end).unwrap();
    b.connect(start, double_id).unwrap();
    b.connect(double_id, end_id).unwrap();
    b.build().unwrap()
}

#[tokio::test]
async fn linear_transform_chain() {
    let (engine, store) = default_engine();
    let workflow = linear_chain();

    let report = engine
        .execute(
            &workflow,
            &TriggerDefinition::manual(),
            vars(&[("input", json!(21))]),
        )
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Completed);
    assert_eq!(report.variable("result"), Some(&json!(42)));

    let events = events_for(&store, report.execution_id).await;
    assert_eq!(events.len(), 8, "exactly 8 events expected");
    assert_contiguous(&events);
    assert_eq!(
        event_types(&events),
        vec![
            EventType::ExecutionStarted,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::NodeStarted,
            EventType::NodeCompleted,
            EventType::ExecutionCompleted,
        ]
    );

    // The double node's completion carries its output.
    let double_completed = &events[4];
    assert_eq!(
        double_completed.data_field("node_name"),
        Some(&json!("double"))
    );
    assert_eq!(
        double_completed
            .data_field("output")
            .and_then(|o| o.get("result")),
        Some(&json!(42))
    );
}

// ── scenario 2: parallel fan-out / fan-in with WaitAll ─────────────────

#[tokio::test]
async fn parallel_fan_out_fan_in_wait_all() {
    let (engine, store) = default_engine();

    let mut b = WorkflowBuilder::new("fan");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let fork = transform("fork", json!({"passthrough": true}));
    let fork_id = fork.id;
    b.add_node_definition(fork).unwrap();

    let b1 = transform("b1", json!({"assignments": {"result": "value * 2"}}));
    let b2 = transform("b2", json!({"assignments": {"result": "value * value"}}));
    let b3 = transform("b3", json!({"assignments": {"result": "value + 100"}}));
    let (b1_id, b2_id, b3_id) = (b1.id, b2.id, b3.id);
    for branch in [b1, b2, b3] {
        b.add_node_definition(branch).unwrap();
    }

    let agg = transform(
        "agg",
        json!({
            "passthrough": true,
            "assignments": {"sum": "b1_result + b2_result + b3_result"}
        }),
    );
    let agg_id = agg.id;
    b.add_node_definition(agg).unwrap();
    let end = transform("end", json!({"passthrough": true}));
    let end_id = end.id;
    b.add_node_definition(end).unwrap();

    b.connect(start, fork_id).unwrap();
    for branch in [b1_id, b2_id, b3_id] {
        b.connect_with(fork_id, branch, EdgeKind::Fork, EdgeConfig::new())
            .unwrap();
        b.connect_with(
            branch,
            agg_id,
            EdgeKind::Join,
            EdgeConfig::new().with_join_strategy(JoinStrategy::WaitAll),
        )
        .unwrap();
    }
    b.connect(agg_id, end_id).unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(
            &workflow,
            &TriggerDefinition::manual(),
            vars(&[("value", json!(10))]),
        )
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Completed);
    assert_eq!(report.variable("b1_result"), Some(&json!(20)));
    assert_eq!(report.variable("b2_result"), Some(&json!(100)));
    assert_eq!(report.variable("b3_result"), Some(&json!(110)));
    assert_eq!(report.variable("sum"), Some(&json!(230)));

    // The aggregation node starts strictly after every branch completed.
    let events = events_for(&store, report.execution_id).await;
    assert_contiguous(&events);
    let agg_started = events
        .iter()
        .position(|e| e.event_type == EventType::NodeStarted && e.node_id == Some(agg_id))
        .unwrap();
    for branch in [b1_id, b2_id, b3_id] {
        let completed = events
            .iter()
            .position(|e| e.event_type == EventType::NodeCompleted && e.node_id == Some(branch))
            .unwrap();
        assert!(
            completed < agg_started,
            "branch must complete before the join target starts"
        );
    }
}

// ── scenario 3: conditional router ─────────────────────────────────────

fn router_workflow() -> (Workflow, mbflow_core::NodeId, mbflow_core::NodeId) {
    let mut b = WorkflowBuilder::new("routed");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let router = NodeDefinition::new(mbflow_core::NodeId::v4(), NodeKind::router(), "router")
        .with_config_entry(
            "routes",
            json!({"high": "score >= 80", "low": "score < 80"}),
        )
        .with_config_entry("default", json!("low"));
    let router_id = router.id;
    b.add_node_definition(router).unwrap();

    let high = transform("high_path", json!({"assignments": {"tier": "'high'"}}));
    let low = transform("low_path", json!({"assignments": {"tier": "'low'"}}));
    let (high_id, low_id) = (high.id, low.id);
    b.add_node_definition(high).unwrap();
    b.add_node_definition(low).unwrap();
    let end = transform("end", json!({"passthrough": true}));
    let end_id = end.id;
    b.add_node_definition(end).unwrap();

    b.connect(start, router_id).unwrap();
    b.connect_with(
        router_id,
        high_id,
        EdgeKind::Conditional,
        EdgeConfig::new().with_condition("selected_route == 'high'"),
    )
    .unwrap();
    b.connect_with(
        router_id,
        low_id,
        EdgeKind::Conditional,
        EdgeConfig::new().with_condition("selected_route == 'low'"),
    )
    .unwrap();
    b.connect(high_id, end_id).unwrap();
    b.connect(low_id, end_id).unwrap();

    (b.build().unwrap(), high_id, low_id)
}

#[tokio::test]
async fn conditional_router_takes_low_branch() {
    let (engine, _store) = default_engine();
    let (workflow, high_id, low_id) = router_workflow();

    let report = engine
        .execute(
            &workflow,
            &TriggerDefinition::manual(),
            vars(&[("score", json!(72))]),
        )
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Completed);
    assert_eq!(report.node_states[&low_id].status, NodeStatus::Completed);
    assert_eq!(report.node_states[&high_id].status, NodeStatus::Skipped);

    let router_id = workflow.node_by_name("router").unwrap().id;
    let router_output = report.node_output(router_id).unwrap();
    assert_eq!(router_output.get("selected_route"), Some(&json!("low")));
    assert_eq!(report.variable("tier"), Some(&json!("low")));
}

#[tokio::test]
async fn conditional_router_takes_high_branch() {
    let (engine, _store) = default_engine();
    let (workflow, high_id, low_id) = router_workflow();

    let report = engine
        .execute(
            &workflow,
            &TriggerDefinition::manual(),
            vars(&[("score", json!(95))]),
        )
        .await
        .unwrap();

    assert_eq!(report.node_states[&high_id].status, NodeStatus::Completed);
    assert_eq!(report.node_states[&low_id].status, NodeStatus::Skipped);
    assert_eq!(report.variable("tier"), Some(&json!("high")));
}

// ── scenario 4: retry success on second attempt ────────────────────────

#[tokio::test]
async fn retry_succeeds_on_second_attempt() {
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(
            NodeKind::new("flaky").unwrap(),
            Arc::new(FlakyExecutor {
                calls: AtomicU32::new(0),
                succeed_on_attempt: 2,
            }),
        )
        .unwrap();
    let config = EngineConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        },
        ..EngineConfig::default()
    };
    let (engine, store) = engine_with(registry, config);

    let mut b = WorkflowBuilder::new("retrying");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let flaky = b
        .add_node(NodeKind::new("flaky").unwrap(), "flaky")
        .unwrap();
    b.connect(start, flaky).unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Completed);
    assert_eq!(report.node_states[&flaky].retry_count, 1);
    assert_eq!(
        report.node_output(flaky).unwrap().get("ok"),
        Some(&json!(true))
    );

    let events = events_for(&store, report.execution_id).await;
    assert_contiguous(&events);

    let retrying = events
        .iter()
        .find(|e| e.event_type == EventType::NodeRetrying)
        .expect("a NodeRetrying event");
    assert_eq!(retrying.node_id, Some(flaky));
    assert_eq!(retrying.data_field("attempt"), Some(&json!(2)));
    assert_eq!(retrying.data_field("delay_ms"), Some(&json!(10)));

    let completed = events
        .iter()
        .find(|e| e.event_type == EventType::NodeCompleted && e.node_id == Some(flaky))
        .unwrap();
    assert_eq!(completed.data_field("retry_count"), Some(&json!(1)));
}

// ── scenario 5: circuit breaker opens ──────────────────────────────────

#[tokio::test]
async fn circuit_breaker_opens_after_threshold() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(
            NodeKind::new("x").unwrap(),
            Arc::new(AlwaysFailExecutor {
                calls: calls.clone(),
            }),
        )
        .unwrap();
    let config = EngineConfig {
        retry: RetryPolicy::no_retries(),
        breaker: BreakerConfig {
            threshold: 3,
            timeout: Duration::from_secs(600),
            half_open_max: 1,
        },
        ..EngineConfig::default()
    };
    let (engine, store) = engine_with(registry, config);

    let mut b = WorkflowBuilder::new("breaker");
    let x = b.add_node(NodeKind::new("x").unwrap(), "x").unwrap();
    let workflow = b.build().unwrap();

    let mut reports = Vec::new();
    for _ in 0..5 {
        reports.push(
            engine
                .execute(&workflow, &TriggerDefinition::manual(), Map::new())
                .await
                .unwrap(),
        );
    }

    // Executions 1-3 ran the executor and failed with the transient error.
    for report in &reports[..3] {
        assert_eq!(report.phase, ExecutionPhase::Failed);
        let state = &report.node_states[&x];
        assert_eq!(state.status, NodeStatus::Failed);
        assert!(state.error_message.as_deref().unwrap().contains("retriable"));
    }

    // The breaker opened during execution 3.
    let third = events_for(&store, reports[2].execution_id).await;
    assert!(
        third.iter().any(|e| e.event_type == EventType::CircuitOpened),
        "execution 3 must carry a CircuitOpened event"
    );

    // Executions 4-5 failed fast without invoking the executor.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    for report in &reports[3..] {
        let state = &report.node_states[&x];
        assert_eq!(state.status, NodeStatus::Failed);
        assert!(
            state
                .error_message
                .as_deref()
                .unwrap()
                .contains("circuit breaker open")
        );
    }
}

// ── scenario 6: edge-declared extra data source ────────────────────────

async fn run_extra_source(topic: &str) -> VariableSet {
    let seen = Arc::new(Mutex::new(None));
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(
            NodeKind::new("capture").unwrap(),
            Arc::new(CapturingExecutor { seen: seen.clone() }),
        )
        .unwrap();
    let (engine, _store) = engine_with(registry, EngineConfig::default());

    let mut b = WorkflowBuilder::new("extra-sources");
    let generate = transform(
        "generate",
        json!({"assignments": {"content": "'post about ' + input_topic"}}),
    );
    let generate_id = generate.id;
    b.add_node_definition(generate).unwrap();
    let analyze = transform("analyze", json!({"assignments": {"analysis": "'ok'"}}));
    let analyze_id = analyze.id;
    b.add_node_definition(analyze).unwrap();

    let router = NodeDefinition::new(mbflow_core::NodeId::v4(), NodeKind::router(), "router")
        .with_config_entry("routes", json!({"enhance": "input_topic == 'Docker'"}))
        .with_config_entry("default", json!("pass"));
    let router_id = router.id;
    b.add_node_definition(router).unwrap();

    let enhance = transform("enhance", json!({"passthrough": true}));
    let pass = transform("pass", json!({"passthrough": true}));
    let (enhance_id, pass_id) = (enhance.id, pass.id);
    b.add_node_definition(enhance).unwrap();
    b.add_node_definition(pass).unwrap();

    let aggregate =
        NodeDefinition::new(mbflow_core::NodeId::v4(), NodeKind::new("capture").unwrap(), "aggregate");
    let aggregate_id = aggregate.id;
    b.add_node_definition(aggregate).unwrap();

    b.connect(generate_id, analyze_id).unwrap();
    b.connect(analyze_id, router_id).unwrap();
    b.connect_with(
        router_id,
        enhance_id,
        EdgeKind::Conditional,
        EdgeConfig::new().with_condition("selected_route == 'enhance'"),
    )
    .unwrap();
    b.connect_with(
        router_id,
        pass_id,
        EdgeKind::Conditional,
        EdgeConfig::new().with_condition("selected_route == 'pass'"),
    )
    .unwrap();
    b.connect(enhance_id, aggregate_id).unwrap();
    b.connect(pass_id, aggregate_id).unwrap();
    b.connect_with(
        router_id,
        aggregate_id,
        EdgeKind::Direct,
        EdgeConfig::new().include_outputs_from([generate_id, analyze_id]),
    )
    .unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(
            &workflow,
            &TriggerDefinition::manual(),
            vars(&[("input_topic", json!(topic))]),
        )
        .await
        .unwrap();
    assert_eq!(report.phase, ExecutionPhase::Completed);

    let captured = seen.lock().clone().expect("aggregate must have run");
    captured
}

#[tokio::test]
async fn extra_sources_visible_on_enhance_branch() {
    let binding = run_extra_source("Docker").await;
    assert_eq!(
        binding.get("generate_content"),
        Some(&json!("post about Docker"))
    );
    assert_eq!(binding.get("analyze_analysis"), Some(&json!("ok")));
}

#[tokio::test]
async fn extra_sources_visible_on_pass_branch() {
    let binding = run_extra_source("Kubernetes").await;
    assert_eq!(
        binding.get("generate_content"),
        Some(&json!("post about Kubernetes"))
    );
}

// ── invariants ─────────────────────────────────────────────────────────

#[tokio::test]
async fn replaying_events_rebuilds_identical_state() {
    let store = Arc::new(InMemoryEventStore::new());
    let engine = Arc::new(WorkflowEngine::new(
        ExecutorRegistry::with_builtins(),
        store.clone(),
        EngineConfig::default(),
    ));
    let workflow = Arc::new(linear_chain());

    let (shared, handle) = engine.execute_with_handle(
        workflow,
        TriggerDefinition::manual(),
        vars(&[("input", json!(21))]),
    );
    let report = handle.await.unwrap().unwrap();
    assert!(report.is_success());

    let events = events_for(&store, report.execution_id).await;
    let rebuilt =
        Execution::rebuild(report.execution_id, report.workflow_id, &events).unwrap();

    let live = shared.read();
    assert_eq!(rebuilt, *live);
    assert_eq!(rebuilt.version(), events.len() as u64);
}

#[tokio::test]
async fn fail_fast_emits_no_further_node_started() {
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(NodeKind::new("boom").unwrap(), Arc::new(FatalExecutor))
        .unwrap();
    let (engine, store) = engine_with(registry, EngineConfig::default());

    let mut b = WorkflowBuilder::new("failing");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let boom = b.add_node(NodeKind::new("boom").unwrap(), "boom").unwrap();
    let after = transform("after", json!({"passthrough": true}));
    let after_id = after.id;
    b.add_node_definition(after).unwrap();
    b.connect(start, boom).unwrap();
    b.connect(boom, after_id).unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Failed);
    assert!(report.error.as_deref().unwrap().contains("intentional failure"));

    let events = events_for(&store, report.execution_id).await;
    assert_contiguous(&events);
    let first_failure = events
        .iter()
        .position(|e| e.event_type == EventType::NodeFailed)
        .unwrap();
    assert!(
        events[first_failure..]
            .iter()
            .all(|e| e.event_type != EventType::NodeStarted),
        "no NodeStarted may follow the first NodeFailed under FailFast"
    );
    assert_eq!(
        events.last().unwrap().event_type,
        EventType::ExecutionFailed
    );
    // The downstream node never entered the pipeline.
    assert!(!report.node_states.contains_key(&after_id));
}

#[tokio::test]
async fn best_effort_lets_joins_progress_past_failures() {
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(NodeKind::new("boom").unwrap(), Arc::new(FatalExecutor))
        .unwrap();
    let config = EngineConfig {
        error_strategy: ErrorStrategy::BestEffort,
        ..EngineConfig::default()
    };
    let (engine, _store) = engine_with(registry, config);

    let mut b = WorkflowBuilder::new("best-effort");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let failing = b.add_node(NodeKind::new("boom").unwrap(), "failing").unwrap();
    let healthy = transform("healthy", json!({"assignments": {"ok": "1"}}));
    let healthy_id = healthy.id;
    b.add_node_definition(healthy).unwrap();
    let merge = transform("merge", json!({"passthrough": true}));
    let merge_id = merge.id;
    b.add_node_definition(merge).unwrap();

    b.connect_with(start, failing, EdgeKind::Fork, EdgeConfig::new()).unwrap();
    b.connect_with(start, healthy_id, EdgeKind::Fork, EdgeConfig::new()).unwrap();
    b.connect_with(
        failing,
        merge_id,
        EdgeKind::Join,
        EdgeConfig::new().with_join_strategy(JoinStrategy::WaitAny),
    )
    .unwrap();
    b.connect_with(healthy_id, merge_id, EdgeKind::Join, EdgeConfig::new()).unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Completed);
    assert_eq!(report.node_states[&failing].status, NodeStatus::Failed);
    assert_eq!(report.node_states[&merge_id].status, NodeStatus::Completed);
    assert_eq!(
        report.node_output(merge_id).unwrap().get("ok"),
        Some(&json!(1))
    );
}

#[tokio::test]
async fn node_timeout_fails_the_node() {
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(NodeKind::new("slow").unwrap(), Arc::new(SlowExecutor))
        .unwrap();
    let (engine, _store) = engine_with(registry, EngineConfig::default());

    let mut b = WorkflowBuilder::new("timeouts");
    let slow = NodeDefinition::new(
        mbflow_core::NodeId::v4(),
        NodeKind::new("slow").unwrap(),
        "slow",
    )
    .with_config_entry("timeout_ms", json!(50));
    let slow_id = slow.id;
    b.add_node_definition(slow).unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Failed);
    let state = &report.node_states[&slow_id];
    assert_eq!(state.status, NodeStatus::Failed);
    assert!(state.error_message.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn execution_timeout_behaves_as_cancellation() {
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(NodeKind::new("slow").unwrap(), Arc::new(SlowExecutor))
        .unwrap();
    let config = EngineConfig {
        execution_timeout: Some(Duration::from_millis(50)),
        ..EngineConfig::default()
    };
    let (engine, _store) = engine_with(registry, config);

    let mut b = WorkflowBuilder::new("deadline");
    let slow = b.add_node(NodeKind::new("slow").unwrap(), "slow").unwrap();
    let after = transform("after", json!({"passthrough": true}));
    let after_id = after.id;
    b.add_node_definition(after).unwrap();
    b.connect(slow, after_id).unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Failed);
    assert_eq!(report.error.as_deref(), Some("execution cancelled"));
    // The node that never ran is skipped during finalization.
    assert_eq!(report.node_states[&after_id].status, NodeStatus::Skipped);
}

#[tokio::test]
async fn loop_edge_readmits_until_bound() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(
            NodeKind::new("counter").unwrap(),
            Arc::new(CountingExecutor {
                calls: calls.clone(),
            }),
        )
        .unwrap();
    let (engine, store) = engine_with(registry, EngineConfig::default());

    let mut b = WorkflowBuilder::new("looped");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let body = b
        .add_node(NodeKind::new("counter").unwrap(), "body")
        .unwrap();
    b.connect(start, body).unwrap();
    b.connect_with(
        body,
        body,
        EdgeKind::Loop,
        EdgeConfig::new().with_max_iterations(2).with_condition("true"),
    )
    .unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();

    assert_eq!(report.phase, ExecutionPhase::Completed);
    // Initial run plus two bounded re-admissions.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.variable("count"), Some(&json!(3)));

    let events = events_for(&store, report.execution_id).await;
    assert_contiguous(&events);
    let body_starts = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeStarted && e.node_id == Some(body))
        .count();
    assert_eq!(body_starts, 3);
}

#[tokio::test]
async fn condition_error_downgrades_to_false_with_warning() {
    let (engine, store) = default_engine();

    let mut b = WorkflowBuilder::new("warned");
    let start = b.add_node(NodeKind::start(), "start").unwrap();
    let target = transform("target", json!({"passthrough": true}));
    let target_id = target.id;
    b.add_node_definition(target).unwrap();
    b.connect_with(
        start,
        target_id,
        EdgeKind::Conditional,
        EdgeConfig::new().with_condition("totally_unbound > 3"),
    )
    .unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();

    // The broken condition deactivates the edge; the execution still
    // completes with the target skipped.
    assert_eq!(report.phase, ExecutionPhase::Completed);
    assert_eq!(report.node_states[&target_id].status, NodeStatus::Skipped);

    let events = events_for(&store, report.execution_id).await;
    assert_contiguous(&events);
    let warning = events
        .iter()
        .find(|e| e.event_type == EventType::ConditionWarning)
        .expect("a ConditionWarning event");
    assert!(
        warning
            .data_field("message")
            .and_then(Value::as_str)
            .unwrap()
            .contains("totally_unbound")
    );
}

#[tokio::test]
async fn conditional_false_branch_does_not_see_source_output() {
    let seen = Arc::new(Mutex::new(None));
    let mut registry = ExecutorRegistry::with_builtins();
    registry
        .register(
            NodeKind::new("capture").unwrap(),
            Arc::new(CapturingExecutor { seen: seen.clone() }),
        )
        .unwrap();
    let (engine, _store) = engine_with(registry, EngineConfig::default());

    // source -> (cond false) -> sink, source -> bridge -> sink: the sink
    // runs via the bridge but must not receive source's output directly.
    let mut b = WorkflowBuilder::new("isolated");
    let source = transform("source", json!({"assignments": {"secret": "42"}}));
    let source_id = source.id;
    b.add_node_definition(source).unwrap();
    let bridge = transform("bridge", json!({"assignments": {"public": "1"}}));
    let bridge_id = bridge.id;
    b.add_node_definition(bridge).unwrap();
    let sink = NodeDefinition::new(
        mbflow_core::NodeId::v4(),
        NodeKind::new("capture").unwrap(),
        "sink",
    );
    let sink_id = sink.id;
    b.add_node_definition(sink).unwrap();

    b.connect(source_id, bridge_id).unwrap();
    b.connect_with(
        source_id,
        sink_id,
        EdgeKind::Conditional,
        EdgeConfig::new().with_condition("false"),
    )
    .unwrap();
    b.connect(bridge_id, sink_id).unwrap();
    let workflow = b.build().unwrap();

    let report = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap();
    assert_eq!(report.phase, ExecutionPhase::Completed);

    let binding = seen.lock().clone().unwrap();
    assert_eq!(binding.get("public"), Some(&json!(1)));
    assert!(
        !binding.contains_key("secret"),
        "a false conditional edge must not leak the source's output"
    );
    assert!(!binding.contains_key("source_secret"));
}

#[tokio::test]
async fn compile_rejects_cycles_before_starting() {
    let (engine, store) = default_engine();

    let mut b = WorkflowBuilder::new("cyclic");
    let a = b.add_node(NodeKind::transform(), "a").unwrap();
    let c = b.add_node(NodeKind::transform(), "c").unwrap();
    b.connect(a, c).unwrap();
    b.connect(c, a).unwrap();
    let workflow = b.build().unwrap();

    let err = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));
    // Nothing was appended: the execution never entered Executing.
    assert!(store.is_empty());
}

#[tokio::test]
async fn unknown_node_kind_rejected_before_starting() {
    let (engine, store) = default_engine();

    let mut b = WorkflowBuilder::new("unregistered");
    b.add_node(NodeKind::new("no-such-kind").unwrap(), "n").unwrap();
    let workflow = b.build().unwrap();

    let err = engine
        .execute(&workflow, &TriggerDefinition::manual(), Map::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no-such-kind"));
    assert!(store.is_empty());
}

#[tokio::test]
async fn observer_receives_lifecycle_in_order() {
    let (engine, _store) = default_engine();
    let observer = Arc::new(mbflow_events::CollectingObserver::new());
    engine.add_observer(observer.clone());

    let workflow = linear_chain();
    let report = engine
        .execute(
            &workflow,
            &TriggerDefinition::manual(),
            vars(&[("input", json!(21))]),
        )
        .await
        .unwrap();
    assert!(report.is_success());

    // Give the fan-out worker a moment to drain.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = observer.snapshot();
    assert!(matches!(
        seen.first(),
        Some(mbflow_events::Notification::ExecutionStarted { .. })
    ));
    assert!(matches!(
        seen.last(),
        Some(mbflow_events::Notification::ExecutionCompleted { .. })
    ));
    let node_events = seen
        .iter()
        .filter(|n| {
            matches!(
                n,
                mbflow_events::Notification::NodeStarted { .. }
                    | mbflow_events::Notification::NodeCompleted { .. }
            )
        })
        .count();
    assert_eq!(node_events, 6);
}
