use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub content: String,
    pub tokens_used: u64,
}

/// Language-model collaborator. Provider fallback, if any, lives behind it.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion>;
}

/// Connection settings for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    /// Base URL up to and excluding `/chat/completions`
    pub base_url: String,
    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Client for providers exposing the OpenAI chat-completions API
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    providers: HashMap<String, ProviderEndpoint>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

impl OpenAiCompatibleClient {
    pub fn new(providers: HashMap<String, ProviderEndpoint>) -> Self {
        Self {
            http: reqwest::Client::new(),
            providers,
        }
    }

    fn build_body(request: &LlmRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion> {
        let endpoint = self
            .providers
            .get(&request.provider)
            .ok_or_else(|| anyhow!("LLM provider '{}' is not configured", request.provider))?;

        let url = format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/'));
        let mut builder = self.http.post(&url).json(&Self::build_body(request));

        if let Some(var) = &endpoint.api_key_env {
            let key = std::env::var(var)
                .with_context(|| format!("API key variable {} is not set", var))?;
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            "Sending completion request: provider={}, model={}",
            request.provider,
            request.model
        );

        let response = builder
            .send()
            .await
            .with_context(|| format!("Request to LLM provider '{}' failed", request.provider))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "LLM provider '{}' returned HTTP {}: {}",
                request.provider,
                status.as_u16(),
                body
            );
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Completion response contained no choices"))?;

        Ok(LlmCompletion {
            content,
            tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(provider: &str) -> LlmRequest {
        LlmRequest {
            provider: provider.to_string(),
            model: "small".to_string(),
            prompt: "hello".to_string(),
            system_prompt: Some("be brief".to_string()),
            temperature: 0.2,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let client = OpenAiCompatibleClient::new(HashMap::new());
        let err = client.complete(&request("nowhere")).await.unwrap_err();
        assert_eq!(err.to_string(), "LLM provider 'nowhere' is not configured");
    }

    #[test]
    fn test_body_includes_system_prompt_first() {
        let body = OpenAiCompatibleClient::build_body(&request("openai"));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
    }
}
