use super::expect_kind;
use crate::config::LlmDefaults;
use crate::error::NodeError;
use crate::node::{NodeConfig, NodeKind};
use crate::services::{LlmClient, LlmRequest};
use crate::workflow::dispatcher::{NodeContext, NodeHandler};
use serde_json::{json, Value};
use std::sync::Arc;

/// Sends a rendered prompt to the LLM collaborator
pub struct LlmQueryHandler {
    client: Arc<dyn LlmClient>,
    defaults: LlmDefaults,
}

impl LlmQueryHandler {
    pub fn new(client: Arc<dyn LlmClient>, defaults: LlmDefaults) -> Self {
        Self { client, defaults }
    }
}

#[async_trait::async_trait]
impl NodeHandler for LlmQueryHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::LlmQuery
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::LlmQuery(c) => Some(c),
            _ => None,
        })?;

        let request = LlmRequest {
            provider: config
                .provider
                .clone()
                .unwrap_or_else(|| self.defaults.provider.clone()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| self.defaults.model.clone()),
            prompt: ctx.render(&config.prompt),
            system_prompt: config.system_prompt.as_deref().map(|s| ctx.render(s)),
            temperature: config.temperature.unwrap_or(self.defaults.temperature),
            max_tokens: config.max_tokens.unwrap_or(self.defaults.max_tokens),
        };

        ctx.log(format!(
            "Querying {}/{} ({} prompt chars)",
            request.provider,
            request.model,
            request.prompt.len()
        ));

        let completion = self.client.complete(&request).await?;
        ctx.log(format!("Received {} tokens", completion.tokens_used));

        Ok(json!({
            "response": completion.content,
            "model": request.model,
            "provider": request.provider,
            "tokensUsed": completion.tokens_used,
        }))
    }
}
