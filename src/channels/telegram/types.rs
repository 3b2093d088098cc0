//! Telegram Bot API request/response types

use serde::{Deserialize, Serialize};

use crate::channels::Keyboard;

/// Telegram Bot API base URL
pub(crate) const API_BASE: &str = "https://api.telegram.org/bot";

/// Reply keyboard markup shown under the input field
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReplyKeyboardMarkup {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
}

/// A button in a reply keyboard row
#[derive(Debug, Clone, Serialize)]
pub(crate) struct KeyboardButton {
    pub text: String,
}

impl From<&Keyboard> for ReplyKeyboardMarkup {
    fn from(kb: &Keyboard) -> Self {
        Self {
            keyboard: kb
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|label| KeyboardButton {
                            text: label.clone(),
                        })
                        .collect()
                })
                .collect(),
            resize_keyboard: true,
        }
    }
}

/// Telegram sendMessage request
#[derive(Serialize)]
pub(crate) struct SendMessageRequest<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<ReplyKeyboardMarkup>,
}

/// Generic Bot API response wrapper
#[derive(Debug, Deserialize)]
pub(crate) struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

/// Bot identity returned by getMe
#[derive(Debug, Deserialize)]
pub(crate) struct BotUser {
    #[allow(dead_code)]
    pub id: i64,
    pub username: Option<String>,
}

/// A single update from getUpdates or a webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    /// Monotonic update identifier
    pub update_id: i64,
    /// New incoming message, if this update carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<UpdateMessage>,
}

/// Message carried by an update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// Message identifier within the chat
    pub message_id: i64,
    /// Chat the message was posted in
    pub chat: UpdateChat,
    /// Sender, absent for channel posts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UpdateUser>,
    /// Text body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Chat info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateChat {
    /// Chat identifier
    pub id: i64,
}

/// User info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUser {
    /// User identifier
    pub id: i64,
    /// Whether the sender is a bot
    #[serde(default)]
    pub is_bot: bool,
    /// First name
    #[serde(default)]
    pub first_name: String,
}
