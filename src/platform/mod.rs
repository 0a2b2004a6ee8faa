pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;

/// A labeled URL button shown under a notification
#[derive(Debug, Clone, PartialEq)]
pub struct LinkButton {
    pub label: String,
    pub url: Url,
}

/// A formatted notification, sent unchanged to every destination.
#[derive(Debug, Clone)]
pub struct Notification {
    /// HTML body
    pub text: String,
    /// Button rows, top to bottom
    pub buttons: Vec<Vec<LinkButton>>,
}

/// Delivery channel for notifications (e.g. Telegram).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver to a single destination. `Ok` only when the platform
    /// acknowledged the message.
    async fn deliver(&self, notification: &Notification, destination: &str) -> Result<()>;
}
