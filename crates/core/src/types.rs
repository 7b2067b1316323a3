use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a stored workflow definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a node, unique within its workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Stored description of a single task node.
///
/// `config` is kept opaque here; it is parsed into a typed
/// [`NodeConfig`](crate::node::NodeConfig) when the execution graph is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Overrides the engine-wide node timeout; `Some(0)` disables it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl NodeSpec {
    pub fn new(
        id: impl Into<String>,
        node_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: NodeId(id),
            node_type: node_type.into(),
            config,
            timeout_secs: None,
        }
    }

    /// Human-readable label, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id.0
        } else {
            &self.name
        }
    }
}

/// Directed dependency edge: `to` runs only after `from` completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: NodeId(from.into()),
            to: NodeId(to.into()),
        }
    }
}

/// Immutable description of a workflow: nodes plus dependency edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// User the workflow runs on behalf of (memory nodes key on it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Status of a node within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    /// Transitions only move forward and terminal states are final.
    pub fn can_transition_to(&self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Running)
                | (NodeStatus::Pending, NodeStatus::Failed)
                | (NodeStatus::Running, NodeStatus::Completed)
                | (NodeStatus::Running, NodeStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        }
    }
}

/// Durable record of one workflow execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Aggregate summary written once when the run ends
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl WorkflowRun {
    pub fn start(workflow_id: WorkflowId) -> Self {
        Self {
            id: RunId::new(),
            workflow_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// Durable record of one node's execution within one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub node_type: String,
    pub status: NodeStatus,
    /// `None` for nodes failed by cascade without ever running
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// What the caller of an execution gets back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Nodes that actually reached COMPLETED
    pub nodes_executed: usize,
    pub nodes_failed: usize,
    /// First failure observed, if any
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_transitions_are_monotonic() {
        assert!(NodeStatus::Pending.can_transition_to(NodeStatus::Running));
        assert!(NodeStatus::Pending.can_transition_to(NodeStatus::Failed));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Completed));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Failed));

        assert!(!NodeStatus::Pending.can_transition_to(NodeStatus::Completed));
        assert!(!NodeStatus::Completed.can_transition_to(NodeStatus::Running));
        assert!(!NodeStatus::Failed.can_transition_to(NodeStatus::Running));
        assert!(!NodeStatus::Completed.can_transition_to(NodeStatus::Failed));
    }

    #[test]
    fn test_node_spec_deserializes_type_tag() {
        let spec: NodeSpec = serde_json::from_value(serde_json::json!({
            "id": "wait",
            "type": "delay",
            "config": { "duration_ms": 10 }
        }))
        .unwrap();

        assert_eq!(spec.id, NodeId::new("wait"));
        assert_eq!(spec.node_type, "delay");
        assert_eq!(spec.display_name(), "wait");
        assert!(spec.timeout_secs.is_none());
    }

    #[test]
    fn test_run_id_round_trips_through_display() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
