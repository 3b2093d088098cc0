//! Telegram channel adapter
//!
//! Bot API for replies and audio delivery, long polling or webhooks for
//! inbound updates, and the public web preview for reading channels.

mod api;
pub mod polling;
pub mod preview;
pub mod types;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::SecretString;

use super::{ChatSender, Keyboard};
use crate::Result;

pub use polling::update_to_incoming;
pub use preview::PreviewSource;
pub use types::Update;

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramChannel {
    token: SecretString,
    client: Client,
    api_base: String,
}

impl TelegramChannel {
    /// Create a new Telegram channel adapter
    #[must_use]
    pub fn new(token: SecretString) -> Self {
        Self::with_api_base(token, types::API_BASE)
    }

    /// Create an adapter talking to a different Bot API server
    #[must_use]
    pub fn with_api_base(token: SecretString, api_base: impl Into<String>) -> Self {
        Self {
            token,
            client: Client::new(),
            api_base: api_base.into(),
        }
    }

    /// Check the token against the Bot API
    ///
    /// # Errors
    ///
    /// Returns error if the token is rejected
    pub async fn connect(&self) -> Result<()> {
        let username = self.get_me().await?;
        tracing::info!(bot = ?username, "Telegram channel connected");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatSender for TelegramChannel {
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<()> {
        self.send_message(chat_id, text, keyboard).await
    }

    async fn send_audio(
        &self,
        chat_id: i64,
        audio: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_audio_file(chat_id, audio, filename, caption).await
    }
}
