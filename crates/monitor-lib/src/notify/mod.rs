//! Operator notifications for restart thresholds and rollback results
//!
//! This module provides:
//! - Message templates for threshold and rollback notifications
//! - Webhook delivery for WeChat Work and Lark bots

mod message;
mod webhook;

pub use message::{restart_message, rollback_message, TIMESTAMP_FORMAT};
pub(crate) use message::now_local;
pub use webhook::{LarkPayload, WebhookNotifier, WechatPayload};

use anyhow::Result;
use async_trait::async_trait;

/// Outbound notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a formatted text message
    async fn send(&self, message: &str) -> Result<()>;
}

/// Supported notification backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyType {
    Wechat,
    Lark,
    /// Anything else; sends are skipped with a warning
    Unsupported(String),
}

impl NotifyType {
    /// Parse a configured notify type, case-insensitively
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "wechat" => NotifyType::Wechat,
            "lark" => NotifyType::Lark,
            _ => NotifyType::Unsupported(value.trim().to_string()),
        }
    }

    /// Whether this type delivers to a webhook
    pub fn uses_webhook(&self) -> bool {
        matches!(self, NotifyType::Wechat | NotifyType::Lark)
    }
}

impl std::fmt::Display for NotifyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyType::Wechat => write!(f, "wechat"),
            NotifyType::Lark => write!(f, "lark"),
            NotifyType::Unsupported(other) => write!(f, "{}", other),
        }
    }
}
