//! Typed node configuration.
//!
//! Stored nodes carry a string type tag and an opaque JSON payload. The graph
//! builder turns each pair into a [`NodeConfig`] so malformed configuration is
//! rejected before anything runs, and handlers receive typed settings.

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Closed set of node types the engine knows how to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    LlmQuery,
    MemoryQuery,
    MemoryStore,
    DocumentRetrieval,
    Conditional,
    Notification,
    Webhook,
    ApiCall,
    DataProcessing,
    CustomScript,
    Delay,
}

impl NodeKind {
    pub const ALL: [NodeKind; 11] = [
        NodeKind::LlmQuery,
        NodeKind::MemoryQuery,
        NodeKind::MemoryStore,
        NodeKind::DocumentRetrieval,
        NodeKind::Conditional,
        NodeKind::Notification,
        NodeKind::Webhook,
        NodeKind::ApiCall,
        NodeKind::DataProcessing,
        NodeKind::CustomScript,
        NodeKind::Delay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::LlmQuery => "llm_query",
            NodeKind::MemoryQuery => "memory_query",
            NodeKind::MemoryStore => "memory_store",
            NodeKind::DocumentRetrieval => "document_retrieval",
            NodeKind::Conditional => "conditional",
            NodeKind::Notification => "notification",
            NodeKind::Webhook => "webhook",
            NodeKind::ApiCall => "api_call",
            NodeKind::DataProcessing => "data_processing",
            NodeKind::CustomScript => "custom_script",
            NodeKind::Delay => "delay",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        NodeKind::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed configuration, one variant per node type
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    LlmQuery(LlmQueryConfig),
    MemoryQuery(MemoryQueryConfig),
    MemoryStore(MemoryStoreConfig),
    DocumentRetrieval(DocumentRetrievalConfig),
    Conditional(ConditionalConfig),
    Notification(NotificationConfig),
    Webhook(WebhookConfig),
    ApiCall(ApiCallConfig),
    DataProcessing(DataProcessingConfig),
    CustomScript(CustomScriptConfig),
    Delay(DelayConfig),
    /// Type tag the engine does not know; fails when dispatched
    Unsupported(String),
}

impl NodeConfig {
    /// Parse the stored payload for `type_tag`
    pub fn parse(type_tag: &str, config: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let Some(kind) = NodeKind::from_tag(type_tag) else {
            return Ok(NodeConfig::Unsupported(type_tag.to_string()));
        };

        let payload = if config.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            config.clone()
        };

        let parsed = match kind {
            NodeKind::LlmQuery => NodeConfig::LlmQuery(serde_json::from_value(payload)?),
            NodeKind::MemoryQuery => NodeConfig::MemoryQuery(serde_json::from_value(payload)?),
            NodeKind::MemoryStore => NodeConfig::MemoryStore(serde_json::from_value(payload)?),
            NodeKind::DocumentRetrieval => {
                NodeConfig::DocumentRetrieval(serde_json::from_value(payload)?)
            }
            NodeKind::Conditional => NodeConfig::Conditional(serde_json::from_value(payload)?),
            NodeKind::Notification => NodeConfig::Notification(serde_json::from_value(payload)?),
            NodeKind::Webhook => NodeConfig::Webhook(serde_json::from_value(payload)?),
            NodeKind::ApiCall => NodeConfig::ApiCall(serde_json::from_value(payload)?),
            NodeKind::DataProcessing => {
                NodeConfig::DataProcessing(serde_json::from_value(payload)?)
            }
            NodeKind::CustomScript => NodeConfig::CustomScript(serde_json::from_value(payload)?),
            NodeKind::Delay => NodeConfig::Delay(serde_json::from_value(payload)?),
        };

        Ok(parsed)
    }

    /// `None` for unsupported type tags
    pub fn kind(&self) -> Option<NodeKind> {
        let kind = match self {
            NodeConfig::LlmQuery(_) => NodeKind::LlmQuery,
            NodeConfig::MemoryQuery(_) => NodeKind::MemoryQuery,
            NodeConfig::MemoryStore(_) => NodeKind::MemoryStore,
            NodeConfig::DocumentRetrieval(_) => NodeKind::DocumentRetrieval,
            NodeConfig::Conditional(_) => NodeKind::Conditional,
            NodeConfig::Notification(_) => NodeKind::Notification,
            NodeConfig::Webhook(_) => NodeKind::Webhook,
            NodeConfig::ApiCall(_) => NodeKind::ApiCall,
            NodeConfig::DataProcessing(_) => NodeKind::DataProcessing,
            NodeConfig::CustomScript(_) => NodeKind::CustomScript,
            NodeConfig::Delay(_) => NodeKind::Delay,
            NodeConfig::Unsupported(_) => return None,
        };
        Some(kind)
    }

    /// Type tag as stored
    pub fn type_tag(&self) -> &str {
        match self {
            NodeConfig::Unsupported(tag) => tag,
            other => other.kind().map(|k| k.as_str()).unwrap_or_default(),
        }
    }

    /// Other nodes this configuration reads from, beyond graph edges
    pub fn references(&self) -> Vec<&NodeId> {
        match self {
            NodeConfig::Conditional(c) => c.depends_on.iter().collect(),
            NodeConfig::DataProcessing(c) => match &c.operation {
                DataOperation::Extract { source, .. } => vec![source],
                DataOperation::Rerank { source, .. } => vec![source],
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmQueryConfig {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQueryConfig {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    pub query: String,
    pub response: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default = "default_memory_type")]
    pub memory_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRetrievalConfig {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalConfig {
    pub condition: Condition,
    /// Nodes to inspect; empty means the node's graph dependencies
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
}

/// Predicate evaluated by a conditional node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    AllSuccess,
    AnySuccess,
    /// Bare variable: true when it resolves
    Exists(String),
    Compare {
        left: String,
        op: CompareOp,
        right: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CompareOp {
    // Two-character operators first so ">=" is not read as ">"
    const TOKENS: [(&'static str, CompareOp); 6] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let condition = s.trim();
        match condition {
            "" => return Err("condition must not be empty".to_string()),
            "all_success" => return Ok(Condition::AllSuccess),
            "any_success" => return Ok(Condition::AnySuccess),
            _ => {}
        }

        for (token, op) in CompareOp::TOKENS {
            if let Some((left, right)) = condition.split_once(token) {
                let (left, right) = (left.trim(), right.trim());
                if left.is_empty() || right.is_empty() {
                    return Err(format!("invalid condition format: {}", condition));
                }
                return Ok(Condition::Compare {
                    left: left.to_string(),
                    op,
                    right: right.to_string(),
                });
            }
        }

        if condition.contains(char::is_whitespace) {
            return Err(format!("unsupported condition: {}", condition));
        }
        Ok(Condition::Exists(condition.to_string()))
    }
}

impl TryFrom<String> for Condition {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::AllSuccess => "all_success".to_string(),
            Condition::AnySuccess => "any_success".to_string(),
            Condition::Exists(var) => var,
            Condition::Compare { left, op, right } => {
                format!("{} {} {}", left, op.as_str(), right)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub message: String,
    /// Delivery channel; defaults to the run's channel
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_post")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body to send; defaults to the upstream results
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub fail_on_error_status: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallConfig {
    pub url: String,
    #[serde(default = "default_get")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub fail_on_error_status: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataProcessingConfig {
    #[serde(default)]
    pub operation: DataOperation,
}

/// Synchronous transform applied by a data-processing node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataOperation {
    /// Forward the single upstream result (or all of them keyed by node)
    #[default]
    Passthrough,
    /// Shallow-merge object results of all upstream nodes
    Merge,
    /// Pick a value out of one node's result with a JSON pointer
    Extract { source: NodeId, pointer: String },
    /// Render a string template
    Template { template: String },
    /// Sort a scored list by `score` and keep the best entries
    Rerank {
        source: NodeId,
        #[serde(default = "default_documents_field")]
        field: String,
        #[serde(default = "default_top_k")]
        top_n: usize,
        #[serde(default)]
        min_score: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomScriptConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub duration_ms: u64,
}

fn default_top_k() -> usize {
    5
}

fn default_importance() -> f32 {
    0.5
}

fn default_memory_type() -> String {
    "conversation".to_string()
}

fn default_post() -> String {
    "POST".to_string()
}

fn default_get() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

fn default_documents_field() -> String {
    "documents".to_string()
}
