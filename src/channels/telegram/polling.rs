//! Telegram polling mode: getUpdates loop and message conversion

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use super::types::Update;
use crate::channels::IncomingMessage;
use crate::dedup::SeenSet;

/// Long-poll timeout passed to getUpdates, in seconds
const LONG_POLL_SECS: u64 = 30;

/// Response from Telegram getUpdates API
#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

impl super::TelegramChannel {
    /// Spawn a background task that polls Telegram's getUpdates API
    ///
    /// Received text messages are forwarded into `tx`. The loop exits when
    /// `shutdown` flips to `true` or the receiving side is dropped.
    pub fn start_polling(
        &self,
        interval: Duration,
        tx: mpsc::Sender<IncomingMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let channel = self.clone();
        tokio::spawn(async move {
            channel.polling_loop(interval, tx, shutdown).await;
        })
    }

    async fn polling_loop(
        &self,
        interval: Duration,
        tx: mpsc::Sender<IncomingMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Err(e) = self.delete_webhook().await {
            tracing::warn!(error = %e, "failed to delete Telegram webhook before polling");
        }

        let mut offset: Option<i64> = None;
        let mut dedup = SeenSet::default();

        tracing::info!("Telegram polling started");

        loop {
            let batch = tokio::select! {
                _ = shutdown.changed() => break,
                batch = self.get_updates(offset) => batch,
            };

            match batch {
                Ok(updates) => {
                    for update in updates {
                        // Advance offset past this update
                        offset = Some(update.update_id + 1);

                        if dedup.is_duplicate(&update.update_id) {
                            continue;
                        }

                        if let Some(msg) = update_to_incoming(&update)
                            && tx.send(msg).await.is_err()
                        {
                            tracing::info!("message receiver dropped, stopping polling");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram getUpdates error");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Telegram polling stopped");
    }

    async fn get_updates(&self, offset: Option<i64>) -> crate::Result<Vec<Update>> {
        let mut params = serde_json::json!({
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message"],
        });
        if let Some(off) = offset {
            params["offset"] = serde_json::json!(off);
        }

        let body: GetUpdatesResponse = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&params)
            .send()
            .await?
            .json()
            .await?;

        if !body.ok {
            return Err(crate::Error::Channel("getUpdates returned ok=false".to_string()));
        }
        Ok(body.result)
    }
}

/// Convert an update into an incoming text message
///
/// Returns `None` for updates without a message, messages from bots, and
/// messages without text.
#[must_use]
pub fn update_to_incoming(update: &Update) -> Option<IncomingMessage> {
    let msg = update.message.as_ref()?;

    if msg.from.as_ref().is_some_and(|u| u.is_bot) {
        return None;
    }

    let text = msg.text.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }

    Some(IncomingMessage {
        update_id: update.update_id,
        chat_id: msg.chat.id,
        sender_name: msg
            .from
            .as_ref()
            .map(|u| u.first_name.clone())
            .unwrap_or_default(),
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::telegram::types::{UpdateChat, UpdateMessage, UpdateUser};

    fn update(text: Option<&str>, is_bot: bool) -> Update {
        Update {
            update_id: 10,
            message: Some(UpdateMessage {
                message_id: 1,
                chat: UpdateChat { id: 77 },
                from: Some(UpdateUser {
                    id: 5,
                    is_bot,
                    first_name: "Ann".to_string(),
                }),
                text: text.map(String::from),
            }),
        }
    }

    #[test]
    fn converts_text_message() {
        let msg = update_to_incoming(&update(Some("  1.5 "), false)).unwrap();
        assert_eq!(msg.chat_id, 77);
        assert_eq!(msg.text, "1.5");
        assert_eq!(msg.sender_name, "Ann");
        assert_eq!(msg.update_id, 10);
    }

    #[test]
    fn skips_bots_and_empty_text() {
        assert!(update_to_incoming(&update(Some("hi"), true)).is_none());
        assert!(update_to_incoming(&update(None, false)).is_none());
        assert!(update_to_incoming(&update(Some("   "), false)).is_none());
        assert!(
            update_to_incoming(&Update {
                update_id: 1,
                message: None
            })
            .is_none()
        );
    }
}
