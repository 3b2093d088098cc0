//! Raw Telegram Bot API calls

use reqwest::multipart::{Form, Part};
use secrecy::ExposeSecret;

use super::types::{BotUser, ReplyKeyboardMarkup, SendMessageRequest, TelegramResponse};
use crate::channels::Keyboard;
use crate::{Error, Result};

/// Title shown by chat clients for delivered digests
const AUDIO_TITLE: &str = "Новости";

/// Performer shown by chat clients for delivered digests
const AUDIO_PERFORMER: &str = "Bot";

impl super::TelegramChannel {
    pub(super) fn method_url(&self, method: &str) -> String {
        format!("{}{}/{method}", self.api_base, self.token.expose_secret())
    }

    /// Send a plain text message, optionally with a reply keyboard
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails or the chat is unreachable
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        let request = SendMessageRequest {
            chat_id,
            text,
            reply_markup: keyboard.map(ReplyKeyboardMarkup::from),
        };

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body_lower = body.to_lowercase();

            if body_lower.contains("chat not found")
                || body_lower.contains("bot was blocked by the user")
            {
                return Err(Error::Channel(format!(
                    "Telegram chat {chat_id} not reachable: {body}"
                )));
            }
            return Err(Error::Channel(format!(
                "Telegram sendMessage error: {status} - {body}"
            )));
        }

        tracing::debug!(chat_id, "Telegram message sent");
        Ok(())
    }

    /// Upload an MP3 file with sendAudio
    ///
    /// # Errors
    ///
    /// Returns error if the upload fails
    pub async fn send_audio_file(
        &self,
        chat_id: i64,
        audio: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        let size = audio.len();
        let part = Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| Error::Channel(format!("invalid audio part: {e}")))?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("title", AUDIO_TITLE)
            .text("performer", AUDIO_PERFORMER)
            .part("audio", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(self.method_url("sendAudio"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram sendAudio error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "Telegram sendAudio error: {status} - {body}"
            )));
        }

        tracing::debug!(chat_id, bytes = size, "Telegram audio sent");
        Ok(())
    }

    /// Verify the token and return the bot username
    ///
    /// # Errors
    ///
    /// Returns error if the token is invalid
    pub async fn get_me(&self) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram getMe error: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Channel("Invalid Telegram bot token".to_string()));
        }

        let body: TelegramResponse<BotUser> = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Telegram getMe parse error: {e}")))?;
        if !body.ok {
            return Err(Error::Channel(format!(
                "Telegram getMe failed: {}",
                body.description.unwrap_or_default()
            )));
        }

        Ok(body.result.and_then(|u| u.username))
    }

    /// Remove any registered webhook so getUpdates can be used
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub async fn delete_webhook(&self) -> Result<()> {
        self.client
            .post(self.method_url("deleteWebhook"))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram deleteWebhook error: {e}")))?;
        Ok(())
    }
}
