//! Order-preserving, non-blocking delivery of notifications to observers.
//!
//! Each registered observer gets a bounded mpsc queue drained by its own
//! task. `publish` never blocks the caller: when an observer's queue is
//! full the notification is dropped for that observer (delivery is
//! best-effort), while every other observer still receives it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::observer::{Notification, Observer, dispatch};

/// Default per-observer queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Fans notifications out to registered observers.
pub struct ObserverFanout {
    capacity: usize,
    senders: Vec<mpsc::Sender<Notification>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ObserverFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverFanout")
            .field("observers", &self.senders.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl ObserverFanout {
    /// Create a fan-out with the default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a fan-out with an explicit per-observer queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// Register an observer. Must be called from within a tokio runtime:
    /// the observer's drain task is spawned immediately.
    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(self.capacity);
        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                dispatch(observer.as_ref(), &notification);
            }
        });
        self.senders.push(tx);
        self.workers.push(worker);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.senders.len()
    }

    /// Publish a notification to every observer, never blocking.
    pub fn publish(&self, notification: &Notification) {
        for sender in &self.senders {
            if let Err(err) = sender.try_send(notification.clone()) {
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(
                            execution_id = %notification.execution_id(),
                            "observer queue full; dropping notification"
                        );
                    }
                    mpsc::error::TrySendError::Closed(_) => {}
                }
            }
        }
    }

    /// Close all queues and wait for observers to drain.
    pub async fn shutdown(mut self) {
        self.senders.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

impl Default for ObserverFanout {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs every notification through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_execution_started(
        &self,
        execution_id: mbflow_core::ExecutionId,
        workflow_id: mbflow_core::WorkflowId,
    ) {
        tracing::info!(%execution_id, %workflow_id, "execution started");
    }

    fn on_execution_completed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        duration: std::time::Duration,
    ) {
        tracing::info!(%execution_id, ?duration, "execution completed");
    }

    fn on_execution_failed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        error: &str,
        duration: std::time::Duration,
    ) {
        tracing::error!(%execution_id, error, ?duration, "execution failed");
    }

    fn on_node_started(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node: mbflow_core::NodeId,
        name: &str,
        attempt: u32,
    ) {
        tracing::debug!(%execution_id, %node, name, attempt, "node started");
    }

    fn on_node_completed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node: mbflow_core::NodeId,
        name: &str,
        _output: &serde_json::Map<String, serde_json::Value>,
        duration: std::time::Duration,
    ) {
        tracing::debug!(%execution_id, %node, name, ?duration, "node completed");
    }

    fn on_node_failed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node: mbflow_core::NodeId,
        name: &str,
        error: &str,
        duration: std::time::Duration,
        will_retry: bool,
    ) {
        tracing::warn!(%execution_id, %node, name, error, ?duration, will_retry, "node failed");
    }

    fn on_node_retrying(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node: mbflow_core::NodeId,
        name: &str,
        attempt: u32,
        delay: std::time::Duration,
    ) {
        tracing::debug!(%execution_id, %node, name, attempt, ?delay, "node retrying");
    }

    fn on_variable_set(
        &self,
        execution_id: mbflow_core::ExecutionId,
        key: &str,
        _value: &serde_json::Value,
    ) {
        tracing::trace!(%execution_id, key, "variable set");
    }
}

/// Records every notification; a test helper.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    seen: Mutex<Vec<Notification>>,
}

impl CollectingObserver {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything seen so far, in delivery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    /// Number of notifications seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns `true` if nothing was seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, notification: &Notification) {
        self.seen.lock().push(notification.clone());
    }
}

impl Observer for CollectingObserver {
    fn on_execution_started(
        &self,
        execution_id: mbflow_core::ExecutionId,
        workflow_id: mbflow_core::WorkflowId,
    ) {
        self.record(&Notification::ExecutionStarted {
            execution_id,
            workflow_id,
        });
    }

    fn on_execution_completed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        duration: std::time::Duration,
    ) {
        self.record(&Notification::ExecutionCompleted {
            execution_id,
            duration,
        });
    }

    fn on_execution_failed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        error: &str,
        duration: std::time::Duration,
    ) {
        self.record(&Notification::ExecutionFailed {
            execution_id,
            error: error.to_string(),
            duration,
        });
    }

    fn on_node_started(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node_id: mbflow_core::NodeId,
        name: &str,
        attempt: u32,
    ) {
        self.record(&Notification::NodeStarted {
            execution_id,
            node_id,
            node_name: name.to_string(),
            attempt,
        });
    }

    fn on_node_completed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node_id: mbflow_core::NodeId,
        name: &str,
        output: &serde_json::Map<String, serde_json::Value>,
        duration: std::time::Duration,
    ) {
        self.record(&Notification::NodeCompleted {
            execution_id,
            node_id,
            node_name: name.to_string(),
            output: output.clone(),
            duration,
        });
    }

    fn on_node_failed(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node_id: mbflow_core::NodeId,
        name: &str,
        error: &str,
        duration: std::time::Duration,
        will_retry: bool,
    ) {
        self.record(&Notification::NodeFailed {
            execution_id,
            node_id,
            node_name: name.to_string(),
            error: error.to_string(),
            duration,
            will_retry,
        });
    }

    fn on_node_retrying(
        &self,
        execution_id: mbflow_core::ExecutionId,
        node_id: mbflow_core::NodeId,
        name: &str,
        attempt: u32,
        delay: std::time::Duration,
    ) {
        self.record(&Notification::NodeRetrying {
            execution_id,
            node_id,
            node_name: name.to_string(),
            attempt,
            delay,
        });
    }

    fn on_variable_set(
        &self,
        execution_id: mbflow_core::ExecutionId,
        key: &str,
        value: &serde_json::Value,
    ) {
        self.record(&Notification::VariableSet {
            execution_id,
            key: key.to_string(),
            value: value.clone(),
        });
    }
}
