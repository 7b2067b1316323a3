//! Single-pipeline RAG workflow (query rewrite, retrieve, rerank, generate)
//! expressed as an ordinary definition for the engine.

use crate::types::{Edge, NodeSpec, WorkflowDefinition, WorkflowId};
use anyhow::{bail, Result};
use serde_json::{json, Map, Value};

const REWRITE_PROMPT: &str = "Rewrite the question below as a short search query. \
Reply with the query only.\n\nQuestion: {{input.query}}";

const GENERATE_PROMPT: &str = "Answer the question using only the context.\n\n\
Context:\n{{rerank.documents}}\n\nQuestion: {{input.query}}";

pub struct RagPipelineBuilder {
    id: WorkflowId,
    owner: Option<String>,
    rewrite: bool,
    retrieve_k: usize,
    top_n: usize,
    min_score: Option<f64>,
    filter: Option<Map<String, Value>>,
    provider: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
}

impl RagPipelineBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(id),
            owner: None,
            rewrite: true,
            retrieve_k: 20,
            top_n: 5,
            min_score: None,
            filter: None,
            provider: None,
            model: None,
            system_prompt: None,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Search with the question as asked instead of an LLM-rewritten query
    pub fn skip_rewrite(mut self) -> Self {
        self.rewrite = false;
        self
    }

    pub fn retrieve_k(mut self, k: usize) -> Self {
        self.retrieve_k = k;
        self
    }

    pub fn top_n(mut self, n: usize) -> Self {
        self.top_n = n;
        self
    }

    pub fn min_score(mut self, score: f64) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn filter(mut self, filter: Map<String, Value>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Run input for a question
    pub fn input(query: &str) -> Value {
        json!({ "query": query })
    }

    fn llm_node(&self, id: &str, prompt: &str, system_prompt: Option<&str>) -> NodeSpec {
        NodeSpec::new(
            id,
            "llm_query",
            json!({
                "prompt": prompt,
                "system_prompt": system_prompt,
                "provider": self.provider,
                "model": self.model,
            }),
        )
    }

    pub fn build(self) -> Result<WorkflowDefinition> {
        if self.top_n == 0 {
            bail!("top_n must be at least 1");
        }
        if self.retrieve_k < self.top_n {
            bail!(
                "retrieve_k ({}) must not be smaller than top_n ({})",
                self.retrieve_k,
                self.top_n
            );
        }

        let mut nodes = Vec::with_capacity(4);
        let mut edges = Vec::with_capacity(3);

        let query = if self.rewrite {
            nodes.push(self.llm_node("rewrite", REWRITE_PROMPT, None));
            edges.push(Edge::new("rewrite", "retrieve"));
            "{{rewrite.response}}"
        } else {
            "{{input.query}}"
        };

        nodes.push(NodeSpec::new(
            "retrieve",
            "document_retrieval",
            json!({
                "query": query,
                "top_k": self.retrieve_k,
                "filter": self.filter,
            }),
        ));

        nodes.push(NodeSpec::new(
            "rerank",
            "data_processing",
            json!({
                "operation": {
                    "type": "rerank",
                    "source": "retrieve",
                    "field": "documents",
                    "top_n": self.top_n,
                    "min_score": self.min_score,
                }
            }),
        ));
        edges.push(Edge::new("retrieve", "rerank"));

        nodes.push(self.llm_node("generate", GENERATE_PROMPT, self.system_prompt.as_deref()));
        edges.push(Edge::new("rerank", "generate"));

        Ok(WorkflowDefinition {
            name: format!("RAG pipeline {}", self.id),
            id: self.id,
            description: Some("Query rewrite, retrieval, rerank and answer generation".to_string()),
            owner: self.owner,
            nodes,
            edges,
        })
    }
}
