use super::template;
use crate::error::NodeError;
use crate::node::{NodeConfig, NodeKind};
use crate::types::{NodeId, NodeStatus, RunId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::timeout;

/// Status and output of another node, as seen when this node was dispatched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub status: NodeStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Run-wide values shared by every node of one execution
#[derive(Debug, Clone)]
pub struct RunScope {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    /// Delivery channel for progress notifications
    pub channel: String,
    /// User the run acts for
    pub owner: Option<String>,
    pub input: Value,
}

/// Everything a handler may read while executing one node
#[derive(Debug)]
pub struct NodeContext {
    pub scope: Arc<RunScope>,
    pub node_id: NodeId,
    pub node_name: String,
    pub config: NodeConfig,
    pub timeout: Option<Duration>,
    /// Graph dependencies first, then nodes the config refers to
    pub dependencies: Vec<NodeId>,
    pub upstream: BTreeMap<NodeId, NodeSnapshot>,
    logs: Mutex<Vec<String>>,
}

impl NodeContext {
    pub fn new(
        scope: Arc<RunScope>,
        node_id: NodeId,
        node_name: String,
        config: NodeConfig,
        timeout: Option<Duration>,
        dependencies: Vec<NodeId>,
        upstream: BTreeMap<NodeId, NodeSnapshot>,
    ) -> Self {
        Self {
            scope,
            node_id,
            node_name,
            config,
            timeout,
            dependencies,
            upstream,
            logs: Mutex::new(Vec::new()),
        }
    }

    /// Append a line to this node's run log
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!("[{}/{}] {}", self.scope.run_id, self.node_id, line);
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    pub fn take_logs(&self) -> Vec<String> {
        std::mem::take(&mut *self.logs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Resolve a template path: `input...`, `<node>.status`, `<node>.error`,
    /// or `<node>...` into that node's result
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let (head, rest) = segments.split_first()?;

        if *head == "input" {
            return template::resolve_path(&self.scope.input, rest).cloned();
        }

        let snapshot = self.upstream.get(&NodeId::new(*head))?;
        match rest {
            ["status"] => Some(Value::String(snapshot.status.as_str().to_string())),
            ["error"] => snapshot.error.clone().map(Value::String),
            _ => snapshot
                .result
                .as_ref()
                .and_then(|result| template::resolve_path(result, rest))
                .cloned(),
        }
    }

    pub fn render(&self, text: &str) -> String {
        template::render(text, &|path| self.lookup(path))
    }

    pub fn render_value(&self, value: &Value) -> Value {
        template::render_value(value, &|path| self.lookup(path))
    }

    /// Results of completed graph dependencies keyed by node id
    pub fn dependency_results(&self) -> serde_json::Map<String, Value> {
        self.dependencies
            .iter()
            .filter_map(|id| {
                let snapshot = self.upstream.get(id)?;
                match (snapshot.status, &snapshot.result) {
                    (NodeStatus::Completed, Some(result)) => Some((id.0.clone(), result.clone())),
                    _ => None,
                }
            })
            .collect()
    }
}

/// Executes one node type. Implemented once per [`NodeKind`].
#[async_trait::async_trait]
pub trait NodeHandler: Send + Sync {
    fn kind(&self) -> NodeKind;

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError>;
}

/// Type-to-handler registry. Dispatch never retries.
#[derive(Default, Clone)]
pub struct NodeDispatcher {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl NodeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same kind
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn NodeHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn supports(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run the node's handler, applying its timeout
    pub async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let handler = ctx
            .config
            .kind()
            .and_then(|kind| self.handlers.get(&kind))
            .ok_or_else(|| NodeError::UnsupportedNodeType(ctx.config.type_tag().to_string()))?;

        match ctx.timeout {
            Some(limit) => match timeout(limit, handler.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Node {} timed out after {:?}", ctx.node_id, limit);
                    Err(NodeError::TimedOut(limit))
                }
            },
            None => handler.execute(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DelayConfig;
    use serde_json::json;

    struct Echo;

    #[async_trait::async_trait]
    impl NodeHandler for Echo {
        fn kind(&self) -> NodeKind {
            NodeKind::Delay
        }

        async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
            ctx.log("echoing");
            Ok(json!({ "node": ctx.node_id.0 }))
        }
    }

    struct Sleepy;

    #[async_trait::async_trait]
    impl NodeHandler for Sleepy {
        fn kind(&self) -> NodeKind {
            NodeKind::Delay
        }

        async fn execute(&self, _ctx: &NodeContext) -> Result<Value, NodeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    fn scope() -> Arc<RunScope> {
        Arc::new(RunScope {
            run_id: RunId::new(),
            workflow_id: WorkflowId::new("wf"),
            channel: "test".to_string(),
            owner: Some("user-1".to_string()),
            input: json!({ "topic": "rust" }),
        })
    }

    fn context(config: NodeConfig, timeout: Option<Duration>) -> NodeContext {
        let mut upstream = BTreeMap::new();
        upstream.insert(
            NodeId::new("a"),
            NodeSnapshot {
                status: NodeStatus::Completed,
                result: Some(json!({ "answer": 42 })),
                error: None,
            },
        );
        upstream.insert(
            NodeId::new("b"),
            NodeSnapshot {
                status: NodeStatus::Failed,
                result: None,
                error: Some("boom".to_string()),
            },
        );
        NodeContext::new(
            scope(),
            NodeId::new("n"),
            "n".to_string(),
            config,
            timeout,
            vec![NodeId::new("a"), NodeId::new("b")],
            upstream,
        )
    }

    fn delay() -> NodeConfig {
        NodeConfig::Delay(DelayConfig { duration_ms: 0 })
    }

    #[tokio::test]
    async fn test_dispatches_to_registered_handler() {
        let dispatcher = NodeDispatcher::new().with_handler(Arc::new(Echo));
        let ctx = context(delay(), None);

        let result = dispatcher.execute(&ctx).await.unwrap();
        assert_eq!(result, json!({ "node": "n" }));
        assert_eq!(ctx.take_logs(), vec!["echoing".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_type_is_unsupported() {
        let dispatcher = NodeDispatcher::new().with_handler(Arc::new(Echo));
        let ctx = context(NodeConfig::Unsupported("telepathy".to_string()), None);

        let err = dispatcher.execute(&ctx).await.unwrap_err();
        assert_eq!(err, NodeError::UnsupportedNodeType("telepathy".to_string()));
    }

    #[tokio::test]
    async fn test_missing_handler_is_unsupported() {
        let dispatcher = NodeDispatcher::new();
        let err = dispatcher.execute(&context(delay(), None)).await.unwrap_err();
        assert_eq!(err, NodeError::UnsupportedNodeType("delay".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_the_node() {
        let dispatcher = NodeDispatcher::new().with_handler(Arc::new(Sleepy));
        let ctx = context(delay(), Some(Duration::from_secs(1)));

        let err = dispatcher.execute(&ctx).await.unwrap_err();
        assert_eq!(err, NodeError::TimedOut(Duration::from_secs(1)));
    }

    #[test]
    fn test_lookup_paths() {
        let ctx = context(delay(), None);
        assert_eq!(ctx.lookup("input.topic"), Some(json!("rust")));
        assert_eq!(ctx.lookup("a.answer"), Some(json!(42)));
        assert_eq!(ctx.lookup("a.status"), Some(json!("completed")));
        assert_eq!(ctx.lookup("b.error"), Some(json!("boom")));
        assert_eq!(ctx.lookup("b.anything"), None);
        assert_eq!(ctx.lookup("zzz"), None);
        assert_eq!(ctx.render("{{a.answer}} about {{input.topic}}"), "42 about rust");
    }

    #[test]
    fn test_dependency_results_skip_failed_nodes() {
        let ctx = context(delay(), None);
        let results = ctx.dependency_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results["a"], json!({ "answer": 42 }));
    }
}
