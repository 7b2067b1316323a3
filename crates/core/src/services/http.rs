use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outbound HTTP call made by webhook and api-call nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON when possible, otherwise the raw text as a string
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// `HttpClient` backed by reqwest
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| anyhow!("Invalid HTTP method: {}", request.method))?;

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("{} {} failed", request.method, request.url))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("Failed to read response body")?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let client = ReqwestHttpClient::new();
        let request = HttpRequest {
            method: "NOT A METHOD".to_string(),
            url: "http://localhost".to_string(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
        };
        let err = client.send(&request).await.unwrap_err();
        assert!(err.to_string().contains("Invalid HTTP method"));
    }

    #[test]
    fn test_success_range() {
        let ok = HttpResponse {
            status: 204,
            body: serde_json::Value::Null,
        };
        let bad = HttpResponse {
            status: 404,
            body: serde_json::Value::Null,
        };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
