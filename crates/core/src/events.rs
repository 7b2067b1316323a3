use crate::types::{NodeId, RunId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A progress event emitted while a run executes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(run_id: RunId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Run lifecycle events
    RunStarted {
        workflow_id: WorkflowId,
        channel: String,
        node_count: usize,
    },
    RunCompleted {
        nodes_executed: usize,
        duration_ms: u64,
    },
    RunFailed {
        error: String,
        nodes_executed: usize,
        nodes_failed: usize,
        duration_ms: u64,
    },

    // Node lifecycle events
    NodeStarted {
        node_id: NodeId,
        node_type: String,
    },
    NodeCompleted {
        node_id: NodeId,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: NodeId,
        error: String,
        duration_ms: u64,
    },
    /// Failed by cascade without being dispatched
    NodeSkipped {
        node_id: NodeId,
        failed_ancestor: NodeId,
    },
}

impl EventType {
    /// Human-readable line for progress notifications
    pub fn describe(&self) -> String {
        match self {
            EventType::RunStarted {
                workflow_id,
                node_count,
                ..
            } => format!("Workflow '{}' started ({} nodes)", workflow_id, node_count),
            EventType::RunCompleted {
                nodes_executed,
                duration_ms,
            } => format!(
                "Workflow completed: {} nodes executed in {} ms",
                nodes_executed, duration_ms
            ),
            EventType::RunFailed {
                error,
                nodes_executed,
                nodes_failed,
                ..
            } => format!(
                "Workflow failed ({} completed, {} failed): {}",
                nodes_executed, nodes_failed, error
            ),
            EventType::NodeStarted { node_id, node_type } => {
                format!("Node '{}' ({}) started", node_id, node_type)
            }
            EventType::NodeCompleted {
                node_id,
                duration_ms,
            } => format!("Node '{}' completed in {} ms", node_id, duration_ms),
            EventType::NodeFailed { node_id, error, .. } => {
                format!("Node '{}' failed: {}", node_id, error)
            }
            EventType::NodeSkipped {
                node_id,
                failed_ancestor,
            } => format!(
                "Node '{}' skipped because '{}' failed",
                node_id, failed_ancestor
            ),
        }
    }
}

/// Event log writer trait
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Persist anything buffered for a run
    async fn flush(&self, run_id: RunId) -> anyhow::Result<()>;

    /// Get all events for a run
    async fn get_run_events(&self, run_id: RunId) -> anyhow::Result<Vec<Event>>;

    /// Get events for a run within a time range
    async fn get_run_events_range(
        &self,
        run_id: RunId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>>;
}

/// Receiver of progress events; implementations must not fail the run
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Sink that drops every event
pub struct NullSink;

#[async_trait::async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::new(
            RunId::new(),
            EventType::NodeSkipped {
                node_id: NodeId::new("d"),
                failed_ancestor: NodeId::new("b"),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"]["type"], "node_skipped");
        assert_eq!(json["event_type"]["node_id"], "d");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type, event.event_type);
    }

    #[test]
    fn test_describe_mentions_the_node() {
        let text = EventType::NodeFailed {
            node_id: NodeId::new("fetch"),
            error: "HTTP 502".to_string(),
            duration_ms: 12,
        }
        .describe();
        assert_eq!(text, "Node 'fetch' failed: HTTP 502");
    }
}
