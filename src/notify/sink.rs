//! Notification delivery targets
//!
//! Sinks swallow their own failures: a notification that cannot be
//! delivered somewhere is logged, never retried, and never blocks others.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::domain::Notification;
use crate::error::{Result, ScorecastError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification);

    fn name(&self) -> &str;
}

/// Writes notifications to the log
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) {
        info!(
            game = %notification.record.entity_id,
            transition = %notification.record.transition,
            has_insight = notification.insight.is_some(),
            "{}",
            notification.headline()
        );
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Serialize)]
struct WebhookMessage {
    msg_type: String,
    content: WebhookContent,
}

#[derive(Serialize)]
struct WebhookContent {
    text: String,
}

/// Posts a text message per notification to a chat webhook
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    webhook_url: String,
}

impl WebhookSink {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ScorecastError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }

    /// Send a text message to the webhook
    pub async fn send_message(&self, text: &str) -> std::result::Result<(), String> {
        let message = WebhookMessage {
            msg_type: "text".to_string(),
            content: WebhookContent {
                text: text.to_string(),
            },
        };

        match self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Webhook notification sent successfully");
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.send_message(&notification.headline()).await {
            error!(
                "Webhook notification for {} failed: {}",
                notification.record.entity_id, e
            );
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Forwards notifications into a channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, notification: &Notification) {
        if self.tx.send(notification.clone()).is_err() {
            debug!("Notification channel closed; dropping notification");
        }
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Fans one notification out to every sink
#[derive(Clone, Default)]
pub struct Dispatcher {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn dispatch(&self, notification: &Notification) {
        for sink in &self.sinks {
            debug!(
                "Delivering {} for {} to {}",
                notification.record.transition,
                notification.record.entity_id,
                sink.name()
            );
            sink.deliver(notification).await;
        }
    }
}
