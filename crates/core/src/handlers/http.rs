use super::expect_kind;
use crate::error::NodeError;
use crate::node::{NodeConfig, NodeKind};
use crate::services::{notify_best_effort, HttpClient, HttpRequest, HttpResponse, Notifier};
use crate::workflow::dispatcher::{NodeContext, NodeHandler};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sends a rendered message through the notifier
pub struct NotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait::async_trait]
impl NodeHandler for NotificationHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Notification
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::Notification(c) => Some(c),
            _ => None,
        })?;

        let channel = config
            .channel
            .as_deref()
            .map(|c| ctx.render(c))
            .unwrap_or_else(|| ctx.scope.channel.clone());
        let message = ctx.render(&config.message);

        // Delivery is best-effort; the node reports it rather than failing
        let delivered = notify_best_effort(self.notifier.as_ref(), &channel, &message).await;
        ctx.log(format!("Notification to {} delivered={}", channel, delivered));

        Ok(json!({ "delivered": delivered, "channel": channel }))
    }
}

/// Pushes a payload to an external URL
pub struct WebhookHandler {
    http: Arc<dyn HttpClient>,
}

impl WebhookHandler {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl NodeHandler for WebhookHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Webhook
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::Webhook(c) => Some(c),
            _ => None,
        })?;

        let body = match &config.payload {
            Some(payload) => ctx.render_value(payload),
            None => json!({
                "runId": ctx.scope.run_id.to_string(),
                "workflowId": ctx.scope.workflow_id.to_string(),
                "node": ctx.node_id.as_str(),
                "results": Value::Object(ctx.dependency_results()),
            }),
        };

        let request = HttpRequest {
            method: config.method.clone(),
            url: ctx.render(&config.url),
            headers: render_map(ctx, &config.headers),
            query: BTreeMap::new(),
            body: Some(body),
        };

        let response = send(self.http.as_ref(), ctx, &request).await?;
        into_result(response, config.fail_on_error_status, &request)
    }
}

/// Calls an external API and surfaces its response
pub struct ApiCallHandler {
    http: Arc<dyn HttpClient>,
}

impl ApiCallHandler {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl NodeHandler for ApiCallHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::ApiCall
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let config = expect_kind(ctx, |c| match c {
            NodeConfig::ApiCall(c) => Some(c),
            _ => None,
        })?;

        let request = HttpRequest {
            method: config.method.clone(),
            url: ctx.render(&config.url),
            headers: render_map(ctx, &config.headers),
            query: render_map(ctx, &config.query),
            body: config.body.as_ref().map(|b| ctx.render_value(b)),
        };

        let response = send(self.http.as_ref(), ctx, &request).await?;
        into_result(response, config.fail_on_error_status, &request)
    }
}

fn render_map(ctx: &NodeContext, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), ctx.render(v)))
        .collect()
}

async fn send(
    http: &dyn HttpClient,
    ctx: &NodeContext,
    request: &HttpRequest,
) -> Result<HttpResponse, NodeError> {
    ctx.log(format!("{} {}", request.method, request.url));
    let response = http.send(request).await?;
    ctx.log(format!("HTTP {}", response.status));
    Ok(response)
}

fn into_result(
    response: HttpResponse,
    fail_on_error_status: bool,
    request: &HttpRequest,
) -> Result<Value, NodeError> {
    if fail_on_error_status && !response.is_success() {
        return Err(NodeError::failed(format!(
            "{} {} returned HTTP {}",
            request.method, request.url, response.status
        )));
    }

    Ok(json!({
        "status": response.status,
        "ok": response.is_success(),
        "body": response.body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{completed, config, context, failed, RecordingNotifier, StaticHttp};

    #[tokio::test]
    async fn test_notification_defaults_to_run_channel() {
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = NotificationHandler::new(notifier.clone());
        let ctx = context(
            config("notification", json!({ "message": "Answer: {{llm.response}}" })),
            Value::Null,
            vec![("llm", completed(json!({ "response": "42" })))],
        );

        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result, json!({ "delivered": true, "channel": "test-channel" }));
        assert_eq!(
            notifier.messages(),
            vec![("test-channel".to_string(), "Answer: 42".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_notification_does_not_fail_node() {
        let handler = NotificationHandler::new(Arc::new(RecordingNotifier::failing()));
        let ctx = context(
            config("notification", json!({ "message": "hi", "channel": "ops" })),
            Value::Null,
            vec![],
        );

        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result["delivered"], false);
        assert_eq!(result["channel"], "ops");
    }

    #[tokio::test]
    async fn test_webhook_posts_dependency_results_by_default() {
        let http = Arc::new(StaticHttp::new(202, json!({ "queued": true })));
        let handler = WebhookHandler::new(http.clone());
        let ctx = context(
            config("webhook", json!({
                "url": "https://hooks.example.com/{{input.hook}}",
                "headers": { "X-Token": "{{input.token}}" }
            })),
            json!({ "hook": "abc", "token": "secret" }),
            vec![("a", completed(json!({ "n": 1 }))), ("b", failed("boom"))],
        );

        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result["status"], 202);
        assert_eq!(result["ok"], true);
        assert_eq!(result["body"]["queued"], true);

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "https://hooks.example.com/abc");
        assert_eq!(requests[0].headers["X-Token"], "secret");
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["results"], json!({ "a": { "n": 1 } }));
    }

    #[tokio::test]
    async fn test_error_status_fails_node() {
        let handler = ApiCallHandler::new(Arc::new(StaticHttp::new(503, json!("down"))));
        let ctx = context(
            config("api_call", json!({ "url": "https://api.example.com/items" })),
            Value::Null,
            vec![],
        );

        let err = handler.execute(&ctx).await.unwrap_err();
        assert_eq!(
            err,
            NodeError::Failed("GET https://api.example.com/items returned HTTP 503".to_string())
        );
    }

    #[tokio::test]
    async fn test_error_status_can_be_surfaced() {
        let http = Arc::new(StaticHttp::new(404, json!({ "error": "missing" })));
        let handler = ApiCallHandler::new(http.clone());
        let ctx = context(
            config("api_call", json!({
                "url": "https://api.example.com/items",
                "query": { "id": "{{input.id}}" },
                "fail_on_error_status": false
            })),
            json!({ "id": 9 }),
            vec![],
        );

        let result = handler.execute(&ctx).await.unwrap();
        assert_eq!(result["status"], 404);
        assert_eq!(result["ok"], false);
        assert_eq!(http.requests.lock().unwrap()[0].query["id"], "9");
    }
}
