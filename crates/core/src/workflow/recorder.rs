use super::dag::ExecutionNode;
use crate::storage::RunStore;
use crate::types::{NodeRun, RunId, WorkflowRun};
use anyhow::Result;
use std::sync::Arc;

/// Writes run and node-run lifecycle records. Passive: it never influences
/// scheduling, and only a failure to create the run is reported to the caller.
#[derive(Clone)]
pub struct RunRecorder {
    store: Arc<dyn RunStore>,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Create the run row; nothing has executed yet, so failure aborts the run
    pub async fn on_run_start(&self, run: &WorkflowRun) -> Result<()> {
        self.store.create_run(run).await
    }

    pub async fn on_node_start(&self, run_id: RunId, node: &ExecutionNode) {
        self.write_node(run_id, node, Vec::new()).await;
    }

    /// Final state of a node, including cascade failures that never started
    pub async fn on_node_terminal(&self, run_id: RunId, node: &ExecutionNode, logs: Vec<String>) {
        self.write_node(run_id, node, logs).await;
    }

    pub async fn on_run_terminal(&self, run: &WorkflowRun) {
        if let Err(e) = self.store.update_run(run).await {
            tracing::warn!("Failed to record end of run {}: {:#}", run.id, e);
        }
    }

    async fn write_node(&self, run_id: RunId, node: &ExecutionNode, logs: Vec<String>) {
        let row = NodeRun {
            run_id,
            node_id: node.id.clone(),
            node_type: node.config.type_tag().to_string(),
            status: node.status,
            started_at: node.started_at,
            finished_at: node.finished_at,
            result: node.result.clone(),
            error: node.error.clone(),
            logs,
        };

        if let Err(e) = self.store.upsert_node_run(&row).await {
            tracing::warn!(
                "Failed to record node {} ({}) for run {}: {:#}",
                node.id,
                node.status.as_str(),
                run_id,
                e
            );
        }
    }
}
