use super::expect_kind;
use crate::error::NodeError;
use crate::node::{NodeConfig, NodeKind};
use crate::services::Retriever;
use crate::workflow::dispatcher::{NodeContext, NodeHandler};
use serde_json::{json, Value};
use std::sync::Arc;

/// Queries the retrieval collaborator and returns ranked documents
pub struct DocumentRetrievalHandler {
    retriever: Arc<dyn Retriever>,
}

impl DocumentRetrievalHandler {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait::async_trait]
impl NodeHandler for DocumentRetrievalHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::DocumentRetrieval
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::DocumentRetrieval(c) => Some(c),
            _ => None,
        })?;

        let query = ctx.render(&config.query);
        let mut documents = self
            .retriever
            .search(&query, config.top_k, config.filter.as_ref())
            .await?;

        if let Some(min_score) = config.min_score {
            documents.retain(|doc| doc.score >= f64::from(min_score));
        }
        ctx.log(format!("Retrieved {} documents", documents.len()));

        let count = documents.len();
        let documents = serde_json::to_value(documents)
            .map_err(|e| NodeError::failed(format!("Failed to encode documents: {}", e)))?;

        Ok(json!({ "documents": documents, "count": count }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Document, KeywordRetriever};
    use crate::test_support::{config, context};

    fn retriever() -> Arc<KeywordRetriever> {
        Arc::new(KeywordRetriever::new(vec![
            Document {
                id: "1".to_string(),
                content: "tokio spawns async tasks".to_string(),
                metadata: Default::default(),
            },
            Document {
                id: "2".to_string(),
                content: "tasks need an executor".to_string(),
                metadata: Default::default(),
            },
        ]))
    }

    #[tokio::test]
    async fn test_returns_ranked_documents() {
        let handler = DocumentRetrievalHandler::new(retriever());
        let ctx = context(
            config("document_retrieval", json!({ "query": "{{input.q}}", "top_k": 3 })),
            json!({ "q": "tokio tasks" }),
            vec![],
        );

        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(result["documents"][0]["id"], "1");
        assert_eq!(result["documents"][0]["score"], 1.0);
    }

    #[tokio::test]
    async fn test_min_score_filters_weak_matches() {
        let handler = DocumentRetrievalHandler::new(retriever());
        let ctx = context(
            config("document_retrieval", json!({ "query": "tokio tasks", "min_score": 0.75 })),
            Value::Null,
            vec![],
        );

        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result["count"], 1);
    }
}
