use anyhow::{Context, Result};
use dagrun_core::config::EngineConfig;
use dagrun_core::services::{
    HttpClient, InMemoryMemoryStore, KeywordRetriever, LogNotifier, Notifier,
    OpenAiCompatibleClient, ProviderEndpoint, ReqwestHttpClient, Services, WebhookNotifier,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_event_log_dir")]
    pub event_log_dir: String,

    #[serde(default = "default_index_file")]
    pub index_file: String,
}

fn default_event_log_dir() -> String {
    "events".to_string()
}

fn default_index_file() -> String {
    "index.redb".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            event_log_dir: default_event_log_dir(),
            index_file: default_index_file(),
        }
    }
}

/// OpenAI-compatible providers by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_providers")]
    pub providers: HashMap<String, ProviderEndpoint>,
}

fn default_providers() -> HashMap<String, ProviderEndpoint> {
    HashMap::from([(
        "openai".to_string(),
        ProviderEndpoint {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
        },
    )])
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotifierConfig {
    /// Progress lines go to the log
    #[default]
    Log,
    /// Progress lines are POSTed to `url`
    Webhook { url: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// JSONL file of documents for the keyword retriever
    #[serde(default)]
    pub documents: Option<PathBuf>,
}

impl CliConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::debug!("Configuration file not found, using defaults");
            Self::default()
        };

        config.data_dir = data_dir;
        config
            .engine
            .validate()
            .context("Invalid [engine] configuration")?;

        Ok(config)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.event_log_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.index_file)
    }

    /// Collaborators handed to node handlers
    pub fn services(&self) -> Result<Services> {
        let retriever = match &self.retrieval.documents {
            Some(path) => KeywordRetriever::from_jsonl(path)?,
            None => KeywordRetriever::default(),
        };

        let notifier: Arc<dyn Notifier> = match &self.notifier {
            NotifierConfig::Log => Arc::new(LogNotifier),
            NotifierConfig::Webhook { url } => Arc::new(WebhookNotifier::new(url.clone())?),
        };

        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());

        Ok(Services {
            llm: Arc::new(OpenAiCompatibleClient::new(self.llm.providers.clone())),
            memory: Arc::new(InMemoryMemoryStore::new()),
            retriever: Arc::new(retriever),
            http,
            notifier,
        })
    }
}
