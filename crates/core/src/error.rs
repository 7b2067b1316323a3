use crate::types::{NodeId, WorkflowId};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building an execution graph. Execution never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },

    #[error("workflow graph contains a cycle through node '{0}'")]
    CycleDetected(NodeId),

    #[error("workflow has nodes but none without dependencies")]
    NoEntryNodes,

    #[error("invalid config for node '{node}' ({node_type}): {message}")]
    InvalidConfig {
        node: NodeId,
        node_type: String,
        message: String,
    },

    #[error("node '{node}' references unknown node '{missing}'")]
    UnknownReference { node: NodeId, missing: NodeId },
}

/// Failure of a single node. Always local to that node and its dependents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("unsupported node type '{0}'")]
    UnsupportedNodeType(String),

    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    #[error("node timed out after {0:?}")]
    TimedOut(Duration),

    /// Handler or collaborator failure, message kept verbatim
    #[error("{0}")]
    Failed(String),

    #[error("node task panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NodeError::Failed(message.into())
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        NodeError::Failed(format!("{:#}", err))
    }
}

/// Errors that prevent a workflow execution from starting
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(WorkflowId),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anyhow_chain_is_flattened_into_node_error() {
        let err = anyhow::anyhow!("connection refused").context("LLM request failed");
        let node_err: NodeError = err.into();
        assert_eq!(
            node_err.to_string(),
            "LLM request failed: connection refused"
        );
    }

    #[test]
    fn test_graph_error_messages_name_the_node() {
        let err = GraphError::DanglingEdge {
            from: NodeId::new("a"),
            to: NodeId::new("ghost"),
            missing: NodeId::new("ghost"),
        };
        assert_eq!(
            err.to_string(),
            "edge a -> ghost references unknown node 'ghost'"
        );
    }
}
