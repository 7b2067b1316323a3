//! Scripted collaborators and helpers shared by unit tests

use crate::events::{Event, EventSink};
use crate::node::NodeConfig;
use crate::services::{
    HttpClient, HttpRequest, HttpResponse, InMemoryMemoryStore, KeywordRetriever, LlmClient,
    LlmCompletion, LlmRequest, Notifier, Services,
};
use crate::storage::RunStore;
use crate::types::{NodeId, NodeRun, RunId, WorkflowId, WorkflowRun};
use crate::workflow::dispatcher::{NodeContext, NodeSnapshot, RunScope};
use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Answers every prompt with `echo: <prompt>`, or fails when told to
#[derive(Default)]
pub struct ScriptedLlm {
    pub requests: Mutex<Vec<LlmRequest>>,
    pub fail_with: Option<String>,
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = &self.fail_with {
            bail!("{}", message);
        }
        Ok(LlmCompletion {
            content: format!("echo: {}", request.prompt),
            tokens_used: request.prompt.split_whitespace().count() as u64,
        })
    }
}

/// Returns a fixed response and keeps every request
pub struct StaticHttp {
    pub requests: Mutex<Vec<HttpRequest>>,
    pub response: HttpResponse,
}

impl StaticHttp {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            response: HttpResponse { status, body },
        }
    }
}

#[async_trait::async_trait]
impl HttpClient for StaticHttp {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.response.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        if self.fail {
            bail!("channel {} unreachable", channel);
        }
        self.messages
            .lock()
            .unwrap()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Concrete collaborators behind a [`Services`] bundle
pub struct TestServices {
    pub llm: Arc<ScriptedLlm>,
    pub memory: Arc<InMemoryMemoryStore>,
    pub retriever: Arc<KeywordRetriever>,
    pub http: Arc<StaticHttp>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestServices {
    pub fn new() -> Self {
        Self {
            llm: Arc::new(ScriptedLlm::default()),
            memory: Arc::new(InMemoryMemoryStore::new()),
            retriever: Arc::new(KeywordRetriever::default()),
            http: Arc::new(StaticHttp::new(200, serde_json::json!({ "ok": true }))),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            llm: self.llm.clone(),
            memory: self.memory.clone(),
            retriever: self.retriever.clone(),
            http: self.http.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

pub fn scope(input: Value) -> Arc<RunScope> {
    Arc::new(RunScope {
        run_id: RunId::new(),
        workflow_id: WorkflowId::new("test-workflow"),
        channel: "test-channel".to_string(),
        owner: Some("owner-1".to_string()),
        input,
    })
}

/// Context for node `n` whose dependencies are the given snapshots
pub fn context(
    config: NodeConfig,
    input: Value,
    upstream: Vec<(&str, NodeSnapshot)>,
) -> NodeContext {
    let dependencies = upstream.iter().map(|(id, _)| NodeId::new(*id)).collect();
    let upstream: BTreeMap<NodeId, NodeSnapshot> = upstream
        .into_iter()
        .map(|(id, snapshot)| (NodeId::new(id), snapshot))
        .collect();

    NodeContext::new(
        scope(input),
        NodeId::new("n"),
        "n".to_string(),
        config,
        None,
        dependencies,
        upstream,
    )
}

pub fn completed(result: Value) -> NodeSnapshot {
    NodeSnapshot {
        status: crate::types::NodeStatus::Completed,
        result: Some(result),
        error: None,
    }
}

pub fn failed(error: &str) -> NodeSnapshot {
    NodeSnapshot {
        status: crate::types::NodeStatus::Failed,
        result: None,
        error: Some(error.to_string()),
    }
}

/// Parse a node config the way the graph builder does
pub fn config(tag: &str, payload: Value) -> NodeConfig {
    NodeConfig::parse(tag, &payload).unwrap()
}

/// Run store whose writes all fail
pub struct BrokenRunStore;

#[async_trait::async_trait]
impl RunStore for BrokenRunStore {
    async fn create_run(&self, _run: &WorkflowRun) -> Result<()> {
        bail!("disk full")
    }
    async fn update_run(&self, _run: &WorkflowRun) -> Result<()> {
        bail!("disk full")
    }
    async fn get_run(&self, _run_id: RunId) -> Result<Option<WorkflowRun>> {
        Ok(None)
    }
    async fn list_runs(&self, _workflow_id: Option<&WorkflowId>) -> Result<Vec<WorkflowRun>> {
        Ok(vec![])
    }
    async fn upsert_node_run(&self, _node_run: &NodeRun) -> Result<()> {
        bail!("disk full")
    }
    async fn list_node_runs(&self, _run_id: RunId) -> Result<Vec<NodeRun>> {
        Ok(vec![])
    }
}
