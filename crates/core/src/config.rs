use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of nodes running at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-node timeout applied when a node does not set its own; 0 disables
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: Option<u64>,

    /// Upper bound on a single progress notification
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,

    #[serde(default)]
    pub llm: LlmDefaults,
}

/// Values used by `llm_query` nodes that leave them unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDefaults {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_concurrency() -> usize {
    3
}

fn default_node_timeout_secs() -> Option<u64> {
    Some(300)
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            node_timeout_secs: default_node_timeout_secs(),
            notify_timeout_secs: default_notify_timeout_secs(),
            llm: LlmDefaults::default(),
        }
    }
}

impl Default for LlmDefaults {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrency == 0 {
            return Err(EngineError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective timeout for a node, honouring its own override
    pub fn node_timeout(&self, node_override: Option<u64>) -> Option<Duration> {
        match node_override.or(self.node_timeout_secs) {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.node_timeout(None), Some(Duration::from_secs(300)));
        assert_eq!(config.notify_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_node_override_and_disable() {
        let config = EngineConfig::default();
        assert_eq!(config.node_timeout(Some(5)), Some(Duration::from_secs(5)));
        assert_eq!(config.node_timeout(Some(0)), None);

        let disabled = EngineConfig {
            node_timeout_secs: None,
            ..EngineConfig::default()
        };
        assert_eq!(disabled.node_timeout(None), None);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = EngineConfig {
            max_concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_concurrency": 8}"#).unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.node_timeout_secs, Some(300));
        assert_eq!(config.llm.max_tokens, 1000);
    }
}
