use super::{sort_node_runs, sort_runs, DefinitionStore, RunStore};
use crate::types::{NodeId, NodeRun, RunId, WorkflowDefinition, WorkflowId, WorkflowRun};
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Definition and run store held in process memory
#[derive(Default)]
pub struct InMemoryStore {
    workflows: RwLock<BTreeMap<WorkflowId, WorkflowDefinition>>,
    runs: RwLock<HashMap<RunId, WorkflowRun>>,
    node_runs: RwLock<HashMap<RunId, BTreeMap<NodeId, NodeRun>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DefinitionStore for InMemoryStore {
    async fn save_workflow(&self, definition: &WorkflowDefinition) -> Result<()> {
        self.workflows
            .write()
            .await
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn load_workflow(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowDefinition>> {
        Ok(self.workflows.read().await.get(workflow_id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => bail!("Run {} not found", run.id),
        }
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<WorkflowRun>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow_id: Option<&WorkflowId>) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| workflow_id.map_or(true, |id| &run.workflow_id == id))
            .cloned()
            .collect();
        sort_runs(&mut runs);
        Ok(runs)
    }

    async fn upsert_node_run(&self, node_run: &NodeRun) -> Result<()> {
        self.node_runs
            .write()
            .await
            .entry(node_run.run_id)
            .or_default()
            .insert(node_run.node_id.clone(), node_run.clone());
        Ok(())
    }

    async fn list_node_runs(&self, run_id: RunId) -> Result<Vec<NodeRun>> {
        let mut node_runs: Vec<NodeRun> = self
            .node_runs
            .read()
            .await
            .get(&run_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        sort_node_runs(&mut node_runs);
        Ok(node_runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeStatus, RunStatus};

    #[tokio::test]
    async fn test_run_lifecycle() {
        let store = InMemoryStore::new();
        let mut run = WorkflowRun::start(WorkflowId::new("wf"));

        assert!(store.update_run(&run).await.is_err());
        store.create_run(&run).await.unwrap();

        run.status = RunStatus::Failed;
        run.error = Some("node 'a' failed".to_string());
        store.update_run(&run).await.unwrap();

        let loaded = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert!(store
            .list_runs(Some(&WorkflowId::new("other")))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_node_runs_are_scoped_to_their_run() {
        let store = InMemoryStore::new();
        let run_id = RunId::new();
        let row = NodeRun {
            run_id,
            node_id: NodeId::new("a"),
            node_type: "delay".to_string(),
            status: NodeStatus::Running,
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            result: None,
            error: None,
            logs: vec![],
        };

        store.upsert_node_run(&row).await.unwrap();
        store
            .upsert_node_run(&NodeRun {
                status: NodeStatus::Completed,
                ..row.clone()
            })
            .await
            .unwrap();

        let rows = store.list_node_runs(run_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, NodeStatus::Completed);
        assert!(store.list_node_runs(RunId::new()).await.unwrap().is_empty());
    }
}
