pub mod event_log;
pub mod index;
pub mod memory;

pub use event_log::JsonlEventLog;
pub use index::RedbStore;
pub use memory::InMemoryStore;

use crate::types::{Edge, NodeRun, NodeSpec, RunId, WorkflowDefinition, WorkflowId, WorkflowRun};
use anyhow::{anyhow, Result};

/// Read/write access to stored workflow definitions
#[async_trait::async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Insert or replace a definition
    async fn save_workflow(&self, definition: &WorkflowDefinition) -> Result<()>;

    async fn load_workflow(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowDefinition>>;

    /// All definitions, ordered by id
    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>>;

    async fn load_nodes(&self, workflow_id: &WorkflowId) -> Result<Vec<NodeSpec>> {
        self.load_workflow(workflow_id)
            .await?
            .map(|definition| definition.nodes)
            .ok_or_else(|| anyhow!("workflow '{}' not found", workflow_id))
    }

    async fn load_edges(&self, workflow_id: &WorkflowId) -> Result<Vec<Edge>> {
        self.load_workflow(workflow_id)
            .await?
            .map(|definition| definition.edges)
            .ok_or_else(|| anyhow!("workflow '{}' not found", workflow_id))
    }
}

/// Durable run and node-run records
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &WorkflowRun) -> Result<()>;

    async fn update_run(&self, run: &WorkflowRun) -> Result<()>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<WorkflowRun>>;

    /// Most recent first, optionally limited to one workflow
    async fn list_runs(&self, workflow_id: Option<&WorkflowId>) -> Result<Vec<WorkflowRun>>;

    /// Insert or replace the row for `(run_id, node_id)`
    async fn upsert_node_run(&self, node_run: &NodeRun) -> Result<()>;

    /// Rows of one run, in start order; never-started nodes last
    async fn list_node_runs(&self, run_id: RunId) -> Result<Vec<NodeRun>>;
}

/// Start order used by every `list_node_runs` implementation
pub(crate) fn sort_node_runs(node_runs: &mut [NodeRun]) {
    node_runs.sort_by(|a, b| {
        a.started_at
            .is_none()
            .cmp(&b.started_at.is_none())
            .then_with(|| a.started_at.cmp(&b.started_at))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
}

/// Most recent first
pub(crate) fn sort_runs(runs: &mut [WorkflowRun]) {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}
