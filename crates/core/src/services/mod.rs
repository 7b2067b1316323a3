// External collaborators consumed by node handlers

pub mod http;
pub mod llm;
pub mod memory;
pub mod notifier;
pub mod retrieval;

pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use llm::{LlmClient, LlmCompletion, LlmRequest, OpenAiCompatibleClient, ProviderEndpoint};
pub use memory::{InMemoryMemoryStore, MemoryMatch, MemoryMetadata, MemoryStore};
pub use notifier::{notify_best_effort, LogNotifier, Notifier, WebhookNotifier};
pub use retrieval::{Document, KeywordRetriever, RankedDocument, Retriever};

use std::sync::Arc;

/// Bundle of collaborators handed to the default handler set
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub memory: Arc<dyn MemoryStore>,
    pub retriever: Arc<dyn Retriever>,
    pub http: Arc<dyn HttpClient>,
    pub notifier: Arc<dyn Notifier>,
}
