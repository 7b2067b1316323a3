use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Attributes attached to a stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub importance: f32,
    pub memory_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A stored memory returned by a query, with its ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMatch {
    pub id: Uuid,
    pub query: String,
    pub response: String,
    pub importance: f32,
    pub memory_type: String,
    pub tags: Vec<String>,
    pub relevance: f32,
    pub score: f32,
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Per-user memory collaborator
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Best matches for `text`; increments access counters of what it returns
    async fn query(&self, user_id: &str, text: &str, top_k: usize) -> Result<Vec<MemoryMatch>>;

    async fn store(
        &self,
        user_id: &str,
        query: &str,
        response: &str,
        metadata: MemoryMetadata,
    ) -> Result<Uuid>;
}

#[derive(Debug, Clone)]
struct MemoryRecord {
    id: Uuid,
    query: String,
    response: String,
    metadata: MemoryMetadata,
    access_count: u64,
    created_at: DateTime<Utc>,
    last_accessed: Option<DateTime<Utc>>,
}

/// In-process memory store keyed by user id
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

const RELEVANCE_WEIGHT: f32 = 0.7;
const IMPORTANCE_WEIGHT: f32 = 0.3;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query tokens present in the record
fn relevance(query_tokens: &HashSet<String>, record: &MemoryRecord) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let mut haystack = tokens(&record.query);
    haystack.extend(tokens(&record.response));
    haystack.extend(record.metadata.tags.iter().map(|t| t.to_lowercase()));

    let hits = query_tokens.iter().filter(|t| haystack.contains(*t)).count();
    hits as f32 / query_tokens.len() as f32
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records for a user
    pub async fn count(&self, user_id: &str) -> usize {
        self.records
            .read()
            .await
            .get(user_id)
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn query(&self, user_id: &str, text: &str, top_k: usize) -> Result<Vec<MemoryMatch>> {
        let query_tokens = tokens(text);
        let mut records = self.records.write().await;
        let Some(user_records) = records.get_mut(user_id) else {
            return Ok(Vec::new());
        };

        let mut ranked: Vec<(usize, f32, f32)> = user_records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| {
                let relevance = relevance(&query_tokens, record);
                if relevance <= 0.0 {
                    return None;
                }
                let score =
                    RELEVANCE_WEIGHT * relevance + IMPORTANCE_WEIGHT * record.metadata.importance;
                Some((idx, relevance, score))
            })
            .collect();

        // Highest score first, newer records win ties
        ranked.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| user_records[b.0].created_at.cmp(&user_records[a.0].created_at))
        });
        ranked.truncate(top_k);

        let now = Utc::now();
        let matches = ranked
            .into_iter()
            .map(|(idx, relevance, score)| {
                let record = &mut user_records[idx];
                record.access_count += 1;
                record.last_accessed = Some(now);

                MemoryMatch {
                    id: record.id,
                    query: record.query.clone(),
                    response: record.response.clone(),
                    importance: record.metadata.importance,
                    memory_type: record.metadata.memory_type.clone(),
                    tags: record.metadata.tags.clone(),
                    relevance,
                    score,
                    access_count: record.access_count,
                    last_accessed: record.last_accessed,
                }
            })
            .collect();

        Ok(matches)
    }

    async fn store(
        &self,
        user_id: &str,
        query: &str,
        response: &str,
        metadata: MemoryMetadata,
    ) -> Result<Uuid> {
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            query: query.to_string(),
            response: response.to_string(),
            metadata: MemoryMetadata {
                importance: metadata.importance.clamp(0.0, 1.0),
                ..metadata
            },
            access_count: 0,
            created_at: Utc::now(),
            last_accessed: None,
        };
        let id = record.id;

        self.records
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(record);

        tracing::debug!("Stored memory {} for user {}", id, user_id);
        Ok(id)
    }
}
