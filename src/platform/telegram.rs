use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, LinkPreviewOptions, ParseMode, Recipient,
};
use tracing::info;

use super::{LinkButton, Notification, Notifier};

/// Per-request timeout for the Bot API
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Numeric ids address chats directly; anything else is a public `@channel`.
fn recipient(destination: &str) -> Recipient {
    let destination = destination.trim();
    match destination.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if destination.starts_with('@') => {
            Recipient::ChannelUsername(destination.to_string())
        }
        Err(_) => Recipient::ChannelUsername(format!("@{destination}")),
    }
}

fn keyboard(rows: &[Vec<LinkButton>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::url(b.label.clone(), b.url.clone()))
            .collect::<Vec<_>>()
    }))
}

fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Sends notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            bot: Bot::with_client(bot_token, client),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, notification: &Notification, destination: &str) -> Result<()> {
        self.bot
            .send_message(recipient(destination), notification.text.clone())
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_link_preview())
            .reply_markup(keyboard(&notification.buttons))
            .await
            .with_context(|| format!("Telegram API error for chat {}", destination))?;

        info!("Message sent to chat {}", destination);
        Ok(())
    }
}
