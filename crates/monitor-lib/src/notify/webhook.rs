//! Webhook delivery for chat-bot notifications
//!
//! Handles:
//! - WeChat Work and Lark text payload formats
//! - A single POST per message; failures are reported to the caller, never retried

use super::{NotifyType, Notifier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for a single webhook delivery
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// WeChat Work bot text message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WechatPayload {
    pub msgtype: String,
    pub text: WechatText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WechatText {
    pub content: String,
}

impl WechatPayload {
    pub fn text(message: &str) -> Self {
        Self {
            msgtype: "text".to_string(),
            text: WechatText {
                content: message.to_string(),
            },
        }
    }
}

/// Lark (Feishu) bot text message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LarkPayload {
    pub msg_type: String,
    pub content: LarkContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LarkContent {
    pub text: String,
}

impl LarkPayload {
    pub fn text(message: &str) -> Self {
        Self {
            msg_type: "text".to_string(),
            content: LarkContent {
                text: message.to_string(),
            },
        }
    }
}

/// Notifier posting to a chat-bot webhook
pub struct WebhookNotifier {
    client: Client,
    notify_type: NotifyType,
    webhook: String,
}

impl WebhookNotifier {
    /// Create a notifier for the given backend and webhook URL
    pub fn new(notify_type: NotifyType, webhook: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            notify_type,
            webhook: webhook.into(),
        })
    }

    pub fn notify_type(&self) -> &NotifyType {
        &self.notify_type
    }

    async fn post<T: Serialize + Sync>(&self, payload: &T) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Webhook request to {} failed", self.webhook))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook returned unexpected status ({}): {}", status, body);
        }

        debug!(notify_type = %self.notify_type, status = %status, "Webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        match &self.notify_type {
            NotifyType::Wechat => self.post(&WechatPayload::text(message)).await,
            NotifyType::Lark => self.post(&LarkPayload::text(message)).await,
            NotifyType::Unsupported(kind) => {
                warn!(notify_type = %kind, "Unsupported notification type, message not sent");
                Ok(())
            }
        }
    }
}
