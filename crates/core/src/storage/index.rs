use super::{sort_node_runs, sort_runs, DefinitionStore, RunStore};
use crate::types::{NodeRun, RunId, WorkflowDefinition, WorkflowId, WorkflowRun};
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

const WORKFLOWS_TABLE: Table = TableDefinition::new("workflows");
const RUNS_TABLE: Table = TableDefinition::new("runs");
const NODE_RUNS_TABLE: Table = TableDefinition::new("node_runs");

/// Durable definition and run store using redb
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

fn node_run_key(run_id: RunId, node_id: &str) -> String {
    format!("{}/{}", run_id, node_id)
}

impl RedbStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        // Initialize tables
        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            write_txn
                .open_table(WORKFLOWS_TABLE)
                .context("Failed to open workflows table")?;
            write_txn
                .open_table(RUNS_TABLE)
                .context("Failed to open runs table")?;
            write_txn
                .open_table(NODE_RUNS_TABLE)
                .context("Failed to open node runs table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).context("Failed to serialize record")?;

        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(table)
                .context("Failed to open table")?;
            table
                .insert(key, bytes.as_slice())
                .with_context(|| format!("Failed to insert {}", key))?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn.open_table(table).context("Failed to open table")?;

        match table.get(key).with_context(|| format!("Failed to get {}", key))? {
            Some(guard) => {
                let record = serde_json::from_slice(guard.value())
                    .with_context(|| format!("Failed to deserialize {}", key))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Every record whose key starts with `prefix`, in key order
    fn scan<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> Result<Vec<T>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn.open_table(table).context("Failed to open table")?;

        let mut records = Vec::new();
        for item in table.range(prefix..).context("Failed to iterate table")? {
            let (key, value) = item.context("Failed to read item")?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let record = serde_json::from_slice(value.value())
                .with_context(|| format!("Failed to deserialize {}", key.value()))?;
            records.push(record);
        }
        Ok(records)
    }

    fn put_workflow(&self, definition: &WorkflowDefinition) -> Result<()> {
        self.put(WORKFLOWS_TABLE, &definition.id.0, definition)
    }

    fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowDefinition>> {
        self.get(WORKFLOWS_TABLE, &workflow_id.0)
    }

    fn scan_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        self.scan(WORKFLOWS_TABLE, "")
    }

    fn put_run(&self, run: &WorkflowRun) -> Result<()> {
        self.put(RUNS_TABLE, &run.id.to_string(), run)
    }

    fn read_run(&self, run_id: RunId) -> Result<Option<WorkflowRun>> {
        self.get(RUNS_TABLE, &run_id.to_string())
    }

    fn scan_runs(&self, workflow_id: Option<&WorkflowId>) -> Result<Vec<WorkflowRun>> {
        let mut runs: Vec<WorkflowRun> = self.scan(RUNS_TABLE, "")?;
        if let Some(workflow_id) = workflow_id {
            runs.retain(|run| &run.workflow_id == workflow_id);
        }
        sort_runs(&mut runs);
        Ok(runs)
    }

    fn put_node_run(&self, node_run: &NodeRun) -> Result<()> {
        let key = node_run_key(node_run.run_id, node_run.node_id.as_str());
        self.put(NODE_RUNS_TABLE, &key, node_run)
    }

    fn scan_node_runs(&self, run_id: RunId) -> Result<Vec<NodeRun>> {
        let mut node_runs: Vec<NodeRun> = self.scan(NODE_RUNS_TABLE, &format!("{}/", run_id))?;
        sort_node_runs(&mut node_runs);
        Ok(node_runs)
    }
}

#[async_trait::async_trait]
impl DefinitionStore for RedbStore {
    async fn save_workflow(&self, definition: &WorkflowDefinition) -> Result<()> {
        self.put_workflow(definition)
    }

    async fn load_workflow(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowDefinition>> {
        self.get_workflow(workflow_id)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        self.scan_workflows()
    }
}

#[async_trait::async_trait]
impl RunStore for RedbStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<()> {
        self.put_run(run)
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<()> {
        self.read_run(run.id)?
            .with_context(|| format!("Run {} not found", run.id))?;
        self.put_run(run)
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<WorkflowRun>> {
        self.read_run(run_id)
    }

    async fn list_runs(&self, workflow_id: Option<&WorkflowId>) -> Result<Vec<WorkflowRun>> {
        self.scan_runs(workflow_id)
    }

    async fn upsert_node_run(&self, node_run: &NodeRun) -> Result<()> {
        self.put_node_run(node_run)
    }

    async fn list_node_runs(&self, run_id: RunId) -> Result<Vec<NodeRun>> {
        self.scan_node_runs(run_id)
    }
}
