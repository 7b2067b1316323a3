use super::{expect_kind, user_id};
use crate::error::NodeError;
use crate::node::{NodeConfig, NodeKind};
use crate::services::{MemoryMetadata, MemoryStore};
use crate::workflow::dispatcher::{NodeContext, NodeHandler};
use serde_json::{json, Value};
use std::sync::Arc;

/// Ranks stored memories for a user against a query
pub struct MemoryQueryHandler {
    store: Arc<dyn MemoryStore>,
}

impl MemoryQueryHandler {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl NodeHandler for MemoryQueryHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::MemoryQuery
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::MemoryQuery(c) => Some(c),
            _ => None,
        })?;

        let user = user_id(ctx, config.user_id.as_deref())?;
        let query = ctx.render(&config.query);
        let memories = self.store.query(&user, &query, config.top_k).await?;
        ctx.log(format!("Found {} memories for user {}", memories.len(), user));

        let count = memories.len();
        let memories = serde_json::to_value(memories)
            .map_err(|e| NodeError::failed(format!("Failed to encode memories: {}", e)))?;

        Ok(json!({ "memories": memories, "count": count }))
    }
}

/// Writes a new memory record for a user
pub struct MemoryStoreHandler {
    store: Arc<dyn MemoryStore>,
}

impl MemoryStoreHandler {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl NodeHandler for MemoryStoreHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::MemoryStore
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::MemoryStore(c) => Some(c),
            _ => None,
        })?;

        let user = user_id(ctx, config.user_id.as_deref())?;
        let metadata = MemoryMetadata {
            importance: config.importance,
            memory_type: config.memory_type.clone(),
            tags: config.tags.clone(),
        };

        let id = self
            .store
            .store(
                &user,
                &ctx.render(&config.query),
                &ctx.render(&config.response),
                metadata,
            )
            .await?;
        ctx.log(format!("Stored memory {}", id));

        Ok(json!({ "memoryId": id.to_string(), "stored": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryMemoryStore;
    use crate::test_support::{completed, config, context};

    #[tokio::test]
    async fn test_store_then_query_for_owner() {
        let store = Arc::new(InMemoryMemoryStore::new());

        let write = MemoryStoreHandler::new(store.clone());
        let ctx = context(
            config("memory_store", json!({
                "query": "{{input.question}}",
                "response": "{{answer.response}}",
                "importance": 0.9,
                "tags": ["deploy"]
            })),
            json!({ "question": "when is the release" }),
            vec![("answer", completed(json!({ "response": "next tuesday" })))],
        );
        let stored = write.execute(&ctx).await.unwrap();
        assert_eq!(stored["stored"], true);
        assert_eq!(store.count("owner-1").await, 1);

        let read = MemoryQueryHandler::new(store.clone());
        let ctx = context(
            config("memory_query", json!({ "query": "release date" })),
            Value::Null,
            vec![],
        );
        let result = read.execute(&ctx).await.unwrap();

        assert_eq!(result["count"], 1);
        assert_eq!(result["memories"][0]["response"], "next tuesday");
        assert_eq!(result["memories"][0]["access_count"], 1);
        assert_eq!(result["memories"][0]["id"], stored["memoryId"]);
    }

    #[tokio::test]
    async fn test_explicit_user_id_overrides_owner() {
        let store = Arc::new(InMemoryMemoryStore::new());
        let handler = MemoryStoreHandler::new(store.clone());
        let ctx = context(
            config("memory_store", json!({
                "query": "q",
                "response": "r",
                "user_id": "{{input.user}}"
            })),
            json!({ "user": "alice" }),
            vec![],
        );

        handler.execute(&ctx).await.unwrap();
        assert_eq!(store.count("alice").await, 1);
        assert_eq!(store.count("owner-1").await, 0);
    }
}
