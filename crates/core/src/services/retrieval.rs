use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::RwLock;

/// A document as held by a retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A search hit, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDocument {
    pub id: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Document-retrieval collaborator
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<RankedDocument>>;
}

/// Keyword-overlap retriever over an in-memory corpus
#[derive(Default)]
pub struct KeywordRetriever {
    documents: RwLock<Vec<Document>>,
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

fn matches_filter(
    document: &Document,
    filter: Option<&serde_json::Map<String, serde_json::Value>>,
) -> bool {
    filter.map_or(true, |filter| {
        filter
            .iter()
            .all(|(key, expected)| document.metadata.get(key) == Some(expected))
    })
}

impl KeywordRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// Load one JSON document per line
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read documents from {}", path.display()))?;

        let mut documents = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let document: Document = serde_json::from_str(line)
                .with_context(|| format!("Invalid document on line {}", line_no + 1))?;
            documents.push(document);
        }

        tracing::info!("Loaded {} documents from {}", documents.len(), path.display());
        Ok(Self::new(documents))
    }

    pub async fn add(&self, document: Document) {
        self.documents.write().await.push(document);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait::async_trait]
impl Retriever for KeywordRetriever {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<RankedDocument>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().await;
        let mut hits: Vec<RankedDocument> = documents
            .iter()
            .filter(|doc| matches_filter(doc, filter))
            .filter_map(|doc| {
                let doc_terms = terms(&doc.content);
                let overlap = query_terms.intersection(&doc_terms).count();
                if overlap == 0 {
                    return None;
                }
                Some(RankedDocument {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    score: overlap as f64 / query_terms.len() as f64,
                    metadata: doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }
}
