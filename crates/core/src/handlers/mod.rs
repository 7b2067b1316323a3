//! Built-in node handlers, one per [`NodeKind`](crate::node::NodeKind)

mod conditional;
mod http;
mod llm;
mod memory;
mod retrieval;
mod transform;

pub use conditional::ConditionalHandler;
pub use http::{ApiCallHandler, NotificationHandler, WebhookHandler};
pub use llm::LlmQueryHandler;
pub use memory::{MemoryQueryHandler, MemoryStoreHandler};
pub use retrieval::DocumentRetrievalHandler;
pub use transform::{CustomScriptHandler, DataProcessingHandler, DelayHandler};

use crate::config::EngineConfig;
use crate::error::NodeError;
use crate::node::NodeConfig;
use crate::services::Services;
use crate::workflow::dispatcher::{NodeContext, NodeDispatcher};
use std::sync::Arc;

impl NodeDispatcher {
    /// Dispatcher with every built-in handler wired to `services`
    pub fn with_services(services: &Services, config: &EngineConfig) -> Self {
        NodeDispatcher::new()
            .with_handler(Arc::new(LlmQueryHandler::new(
                services.llm.clone(),
                config.llm.clone(),
            )))
            .with_handler(Arc::new(MemoryQueryHandler::new(services.memory.clone())))
            .with_handler(Arc::new(MemoryStoreHandler::new(services.memory.clone())))
            .with_handler(Arc::new(DocumentRetrievalHandler::new(
                services.retriever.clone(),
            )))
            .with_handler(Arc::new(ConditionalHandler))
            .with_handler(Arc::new(NotificationHandler::new(services.notifier.clone())))
            .with_handler(Arc::new(WebhookHandler::new(services.http.clone())))
            .with_handler(Arc::new(ApiCallHandler::new(services.http.clone())))
            .with_handler(Arc::new(DataProcessingHandler))
            .with_handler(Arc::new(CustomScriptHandler))
            .with_handler(Arc::new(DelayHandler))
    }
}

/// Config variant mismatch; the dispatcher routes by kind so this means a
/// handler was registered under the wrong kind
pub(crate) fn wrong_config(ctx: &NodeContext) -> NodeError {
    NodeError::InvalidConfig(format!(
        "node '{}' has {} config",
        ctx.node_id,
        ctx.config.type_tag()
    ))
}

/// Owner used by memory nodes without an explicit `user_id`
pub(crate) fn user_id(ctx: &NodeContext, configured: Option<&str>) -> Result<String, NodeError> {
    match configured {
        Some(id) => Ok(ctx.render(id)),
        None => ctx.scope.owner.clone().ok_or_else(|| {
            NodeError::InvalidConfig(
                "no user_id configured and the workflow has no owner".to_string(),
            )
        }),
    }
}

pub(crate) fn expect_kind<'a, T>(
    ctx: &'a NodeContext,
    pick: impl FnOnce(&'a NodeConfig) -> Option<&'a T>,
) -> Result<&'a T, NodeError> {
    pick(&ctx.config).ok_or_else(|| wrong_config(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::test_support::TestServices;

    #[test]
    fn test_default_dispatcher_covers_every_kind() {
        let services = TestServices::new();
        let dispatcher =
            NodeDispatcher::with_services(&services.services(), &EngineConfig::default());
        for kind in NodeKind::ALL {
            assert!(dispatcher.supports(kind), "missing handler for {}", kind);
        }
    }
}
