use anyhow::{bail, Context, Result};
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers human-readable progress messages to a channel.
///
/// Callers treat delivery as best-effort: a failed notification is logged
/// and never fails a node or a run.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> Result<()>;
}

/// Writes notifications to the tracing log
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        tracing::info!("[{}] {}", channel, message);
        Ok(())
    }
}

/// Posts `{channel, message}` JSON to a URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build webhook client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "channel": channel, "message": message }))
            .send()
            .await
            .context("Failed to deliver notification")?;

        if !response.status().is_success() {
            bail!("Notification endpoint returned HTTP {}", response.status().as_u16());
        }
        Ok(())
    }
}

/// Send a notification, logging instead of propagating failures
pub async fn notify_best_effort(notifier: &dyn Notifier, channel: &str, message: &str) -> bool {
    match notifier.notify(channel, message).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Notification to channel {} failed: {:#}", channel, e);
            false
        }
    }
}
