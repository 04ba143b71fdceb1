//! services/bot/src/adapters/telegram.rs
//!
//! This module contains the adapter for the Telegram Bot API.
//! It implements the `ChatTransport` port from the `core` crate on top of `teloxide`.

use async_trait::async_trait;
use std::path::Path;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction as TgChatAction, InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove,
    ParseMode, ReplyMarkup,
};
use teloxide::{ApiError, RequestError};
use tracing::debug;

use pdfbot_core::domain::{ChatAction, ChatId, Keyboard, Reply};
use pdfbot_core::ports::{ChatTransport, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ChatTransport` port using a `teloxide` bot.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Creates a new `TelegramTransport`.
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn markup(keyboard: Keyboard) -> Option<ReplyMarkup> {
    match keyboard {
        Keyboard::Keep => None,
        Keyboard::Remove => Some(KeyboardRemove::new().into()),
        Keyboard::Choices(rows) => {
            let rows = rows
                .into_iter()
                .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>());
            Some(
                KeyboardMarkup::new(rows)
                    .resize_keyboard()
                    .one_time_keyboard()
                    .into(),
            )
        }
    }
}

fn action(action: ChatAction) -> TgChatAction {
    match action {
        ChatAction::Typing => TgChatAction::Typing,
        ChatAction::UploadDocument => TgChatAction::UploadDocument,
        ChatAction::UploadPhoto => TgChatAction::UploadPhoto,
    }
}

/// Manually maps client errors into port errors, which respects the orphan rule.
fn port_error(e: RequestError) -> PortError {
    match e {
        RequestError::Api(ApiError::InvalidToken) => PortError::Unauthorized,
        RequestError::Api(ApiError::BotBlocked) => {
            PortError::NotFound("chat blocked the bot".into())
        }
        other => PortError::Unexpected(other.to_string()),
    }
}

//=========================================================================================
// `ChatTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send(&self, chat_id: ChatId, reply: Reply) -> PortResult<()> {
        let chat = teloxide::types::ChatId(chat_id);
        match reply {
            Reply::Text {
                text,
                keyboard,
                rich,
            } => {
                let mut request = self.bot.send_message(chat, text);
                if rich {
                    request = request.parse_mode(ParseMode::Html);
                }
                if let Some(markup) = markup(keyboard) {
                    request = request.reply_markup(markup);
                }
                request.await.map_err(port_error)?;
            }
            Reply::Action(a) => {
                self.bot
                    .send_chat_action(chat, action(a))
                    .await
                    .map_err(port_error)?;
            }
            Reply::Document { path, caption } => {
                self.bot
                    .send_document(chat, InputFile::file(path))
                    .caption(caption)
                    .await
                    .map_err(port_error)?;
            }
        }
        Ok(())
    }

    async fn fetch_file(&self, file_id: &str, dest: &Path) -> PortResult<()> {
        let file = self.bot.get_file(file_id).await.map_err(port_error)?;
        debug!("Downloading {} ({} bytes)", file.path, file.meta.size);

        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
