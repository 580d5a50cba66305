//! The append-only event log contract and its in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use mbflow_core::ExecutionId;
use parking_lot::Mutex;
use thiserror::Error;

use crate::event::Event;

/// Errors raised by event log implementations.
#[derive(Debug, Error)]
pub enum EventError {
    /// An appended event would break sequence contiguity.
    #[error("sequence gap for execution {execution_id}: expected {expected}, got {found}")]
    SequenceGap {
        /// The execution whose stream was violated.
        execution_id: ExecutionId,
        /// The next sequence number the stream accepts.
        expected: u64,
        /// The sequence number that was offered.
        found: u64,
    },

    /// The backing store failed.
    #[error("event storage: {0}")]
    Storage(String),
}

/// An append-only log of execution events.
///
/// `append_batch` is atomic: either every event in the batch is recorded or
/// the log is left unchanged. The engine requires per-execution atomicity
/// only; implementations need no cross-execution transactions.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a single event.
    async fn append(&self, event: Event) -> Result<(), EventError>;

    /// Append a batch of events atomically.
    async fn append_batch(&self, events: Vec<Event>) -> Result<(), EventError>;

    /// All events for an execution, ordered by sequence number.
    async fn list_by_execution(&self, id: ExecutionId) -> Result<Vec<Event>, EventError>;
}

/// In-memory event store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<ExecutionId, Vec<Event>>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.lock().values().map(Vec::len).sum()
    }

    /// Returns `true` if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: Event) -> Result<(), EventError> {
        self.append_batch(vec![event]).await
    }

    async fn append_batch(&self, events: Vec<Event>) -> Result<(), EventError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut streams = self.streams.lock();

        // Validate the whole batch before touching the stream, so a bad
        // batch leaves the log unchanged.
        let mut next: HashMap<ExecutionId, u64> = HashMap::new();
        for event in &events {
            let expected = *next.entry(event.execution_id).or_insert_with(|| {
                streams
                    .get(&event.execution_id)
                    .and_then(|s| s.last())
                    .map_or(1, |last| last.sequence + 1)
            });
            if event.sequence != expected {
                return Err(EventError::SequenceGap {
                    execution_id: event.execution_id,
                    expected,
                    found: event.sequence,
                });
            }
            next.insert(event.execution_id, expected + 1);
        }

        for event in events {
            streams.entry(event.execution_id).or_default().push(event);
        }
        Ok(())
    }

    async fn list_by_execution(&self, id: ExecutionId) -> Result<Vec<Event>, EventError> {
        Ok(self.streams.lock().get(&id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use mbflow_core::WorkflowId;

    fn event(execution_id: ExecutionId, sequence: u64) -> Event {
        Event::new(
            EventType::VariableSet,
            execution_id,
            WorkflowId::v4(),
            sequence,
        )
    }

    #[tokio::test]
    async fn append_and_list_preserves_order() {
        let store = InMemoryEventStore::new();
        let exec = ExecutionId::v4();

        for seq in 1..=3 {
            store.append(event(exec, seq)).await.unwrap();
        }

        let events = store.list_by_execution(exec).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn rejects_sequence_gap() {
        let store = InMemoryEventStore::new();
        let exec = ExecutionId::v4();
        store.append(event(exec, 1)).await.unwrap();

        let err = store.append(event(exec, 3)).await.unwrap_err();
        assert!(matches!(
            err,
            EventError::SequenceGap {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejects_stream_not_starting_at_one() {
        let store = InMemoryEventStore::new();
        let err = store.append(event(ExecutionId::v4(), 5)).await.unwrap_err();
        assert!(matches!(err, EventError::SequenceGap { expected: 1, .. }));
    }

    #[tokio::test]
    async fn batch_append_is_atomic() {
        let store = InMemoryEventStore::new();
        let exec = ExecutionId::v4();

        // Second event breaks contiguity; nothing must be stored.
        let batch = vec![event(exec, 1), event(exec, 3)];
        assert!(store.append_batch(batch).await.is_err());
        assert!(store.is_empty());

        let batch = vec![event(exec, 1), event(exec, 2)];
        store.append_batch(batch).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn streams_are_isolated_per_execution() {
        let store = InMemoryEventStore::new();
        let a = ExecutionId::v4();
        let b = ExecutionId::v4();

        store.append(event(a, 1)).await.unwrap();
        store.append(event(b, 1)).await.unwrap();
        store.append(event(a, 2)).await.unwrap();

        assert_eq!(store.list_by_execution(a).await.unwrap().len(), 2);
        assert_eq!(store.list_by_execution(b).await.unwrap().len(), 1);
        assert!(
            store
                .list_by_execution(ExecutionId::v4())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let store = InMemoryEventStore::new();
        store.append_batch(vec![]).await.unwrap();
        assert!(store.is_empty());
    }
}
