//! [`TelegramNotifier`]: Bot API delivery and permission probing.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, MessageId, ParseMode, ThreadId};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};
use tracking::{Destination, Notification, NotificationSender, PermissionValidator, SendError};

use crate::render::render;

/// Maximum length of one Telegram text message, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

const PROBE_TEXT: &str = "Checking that repowatch can post here. This message is removed right away.";

/// Sends notifications through a Telegram bot.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    /// Creates a notifier for the bot with the given token.
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(bot_token),
        }
    }

    /// Wraps an existing bot handle.
    pub fn from_bot(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send_text(&self, destination: &Destination, text: &str) -> Result<Message, RequestError> {
        let mut request = self
            .bot
            .send_message(ChatId(destination.chat_id()), text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview());
        if let Some(thread) = destination.thread_id() {
            request = request.message_thread_id(ThreadId(MessageId(thread.get())));
        }
        request.await
    }
}

fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

#[async_trait]
impl NotificationSender for TelegramNotifier {
    async fn send(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), SendError> {
        let text = render(notification);
        for chunk in chunk_message(&text, MAX_MESSAGE_LENGTH) {
            self.send_text(destination, &chunk)
                .await
                .map_err(|e| map_error(&e))?;
        }
        debug!(%destination, "Notification sent");
        Ok(())
    }
}

#[async_trait]
impl PermissionValidator for TelegramNotifier {
    async fn can_post(&self, destination: &Destination) -> bool {
        match self.send_text(destination, PROBE_TEXT).await {
            Ok(message) => {
                if let Err(e) = self.bot.delete_message(message.chat.id, message.id).await {
                    warn!(%destination, error = %e, "Failed to delete permission probe");
                }
                true
            }
            Err(e) => {
                debug!(%destination, error = %e, "Permission probe rejected");
                false
            }
        }
    }
}

/// Maps a Bot API failure onto [`SendError`].
///
/// Only failures that identify a chat the bot can never reach again are
/// permanent.
pub fn map_error(error: &RequestError) -> SendError {
    match error {
        RequestError::Api(api) if is_permanent(api) => SendError::PermanentlyInvalid {
            reason: api.to_string(),
        },
        RequestError::MigrateToChatId(chat) => SendError::PermanentlyInvalid {
            reason: format!("chat migrated to {chat}"),
        },
        RequestError::RetryAfter(seconds) => SendError::Transient {
            reason: error.to_string(),
            retry_after: Some(seconds.duration()),
        },
        other => SendError::Transient {
            reason: other.to_string(),
            retry_after: None,
        },
    }
}

fn is_permanent(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation
            | ApiError::CantTalkWithBots
    )
}

/// Splits `text` into pieces of at most `max_len` characters, preferring to
/// break after a newline.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    loop {
        let end = match remaining.char_indices().nth(max_len) {
            None => {
                chunks.push(remaining.to_string());
                return chunks;
            }
            Some((end, _)) => end,
        };
        let split_at = remaining[..end]
            .rfind('\n')
            .map(|pos| pos + 1)
            .unwrap_or(end);
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.to_string());
        remaining = rest;
        if remaining.is_empty() {
            return chunks;
        }
    }
}
