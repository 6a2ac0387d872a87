use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::UpdateKind;
use tracing::debug;

use super::{Platform, Update};
use crate::error::RelayError;

/// Telegram rejects messages over 4096 characters; leave some headroom.
const MAX_MESSAGE_LEN: usize = 4000;

/// Extra time on top of the long-poll timeout before the HTTP client gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

impl From<&teloxide::types::Update> for Update {
    fn from(update: &teloxide::types::Update) -> Self {
        let text = match &update.kind {
            UpdateKind::Message(msg) => msg.text().map(str::to_string),
            _ => None,
        };
        Self {
            id: i64::from(update.id.0),
            chat_id: update.chat().map(|chat| chat.id.0),
            user_id: update.from().map(|user| user.id.0),
            text,
        }
    }
}

/// Parse a webhook request body as a single Telegram update.
pub fn parse_update(body: &[u8]) -> Result<Update, RelayError> {
    let update: teloxide::types::Update =
        serde_json::from_slice(body).map_err(|e| RelayError::MalformedUpdate(e.to_string()))?;
    Ok(Update::from(&update))
}

/// Bot API client backed by teloxide.
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self> {
        // teloxide's default client times out before a 30s long poll returns
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + POLL_GRACE)
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            bot: Bot::with_client(token, client),
        })
    }
}

#[async_trait]
impl Platform for TelegramPlatform {
    async fn register_webhook(&self, url: &Url, secret_token: Option<&str>) -> Result<()> {
        let mut request = self
            .bot
            .set_webhook(url.clone())
            .drop_pending_updates(true);
        if let Some(secret) = secret_token {
            request = request.secret_token(secret.to_string());
        }
        request.await.context("setWebhook request failed")?;
        Ok(())
    }

    async fn remove_webhook(&self) -> Result<()> {
        self.bot
            .delete_webhook()
            .await
            .context("deleteWebhook request failed")?;
        Ok(())
    }

    async fn fetch_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let timeout_secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        let mut request = self.bot.get_updates().timeout(timeout_secs);
        if let Some(offset) = offset {
            let offset = i32::try_from(offset).context("Update offset out of range")?;
            request = request.offset(offset);
        }
        let updates = request.await.context("getUpdates request failed")?;
        debug!("Fetched {} update(s)", updates.len());
        Ok(updates.iter().map(Update::from).collect())
    }

    async fn send_reply(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            self.bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .with_context(|| format!("sendMessage to chat {} failed", chat_id))?;
        }
        Ok(())
    }
}
