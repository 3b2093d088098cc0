//! Pipeline relay
//!
//! ```text
//! conversation ──requests──▶ FetchStage ──texts──▶ SynthStage ──sendAudio──▶ chat
//! ```
//!
//! Each hop is at-least-once. Stages skip envelopes already seen under the
//! same `(chat_id, submitted_at)` key and end every failed run with exactly
//! one message to the originating chat.

pub mod envelope;
pub mod stages;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::Subscription;
use crate::channels::{ChatSender, Post};
use crate::normalize::normalize;
use crate::Result;

pub use envelope::{SubmitEnvelope, TextsEnvelope};
pub use stages::{FetchStage, SynthStage};

/// Pause after a failed receive before polling again
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Filename for delivered audio
pub const AUDIO_FILENAME: &str = "digest.mp3";

/// User-facing failure texts
pub mod messages {
    pub const INVALID_REQUEST: &str = "Не удалось обработать запрос. Пожалуйста, отправьте его заново.";
    pub const FETCH_FAILED: &str = "Не удалось прочитать канал. Повторите попытку позже.";
    pub const SYNTH_FAILED: &str = "Не удалось озвучить новости. Повторите попытку позже.";
    pub const DELIVERY_FAILED: &str =
        "Приносим извинения за неудобства! На удаленном сервере произошла ошибка, пожалуйста, повторите попытку позже.";

    #[must_use]
    pub fn channel_not_found(channel: &str) -> String {
        format!("Канал @{channel} не найден. Проверьте имя и попробуйте снова.")
    }

    #[must_use]
    pub fn nothing_new(channel: &str, window_hours: u32) -> String {
        format!("За последние {window_hours} ч. в канале @{channel} нет новостей.")
    }
}

/// One stage of the relay: consumes raw envelopes from a hop
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage name for logs
    fn name(&self) -> &'static str;

    /// Process one payload to completion
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

/// Build the hop-2 text map from fetched posts
///
/// Posts published in the same second share a key and are joined oldest
/// first. Texts that normalize to nothing are dropped.
#[must_use]
pub fn build_texts(posts: &[Post]) -> BTreeMap<i64, String> {
    let mut grouped: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
    for post in posts.iter().rev() {
        grouped
            .entry(post.published_at.timestamp())
            .or_default()
            .push(&post.text);
    }

    grouped
        .into_iter()
        .filter_map(|(ts, parts)| {
            let text = normalize(&parts.join("\n"));
            (!text.is_empty()).then_some((ts, text))
        })
        .collect()
}

/// Send a message to the chat, logging instead of failing
pub(crate) async fn notify(sender: &dyn ChatSender, chat_id: i64, text: &str) {
    if let Err(e) = sender.send_text(chat_id, text, None).await {
        tracing::warn!(chat_id, error = %e, "failed to notify chat");
    }
}

/// Spawn `workers` consumers sharing one subscription
///
/// Each worker acknowledges a delivery only after handling it, and stops
/// taking new deliveries once `shutdown` flips.
pub fn spawn_workers(
    handler: Arc<dyn StageHandler>,
    subscription: Arc<dyn Subscription>,
    workers: usize,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker| {
            let handler = Arc::clone(&handler);
            let subscription = Arc::clone(&subscription);
            let shutdown = shutdown.clone();
            tokio::spawn(worker_loop(handler, subscription, worker, shutdown))
        })
        .collect()
}

async fn worker_loop(
    handler: Arc<dyn StageHandler>,
    subscription: Arc<dyn Subscription>,
    worker: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let stage = handler.name();
    tracing::info!(stage, worker, "stage worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delivery = tokio::select! {
            _ = shutdown.changed() => break,
            delivery = subscription.next() => delivery,
        };

        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(stage, worker, error = %e, "receive failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(RECEIVE_BACKOFF) => continue,
                }
            }
        };

        tracing::debug!(stage, worker, partition = delivery.partition, offset = delivery.offset, "processing");
        if let Err(e) = handler.handle(&delivery.payload).await {
            tracing::error!(stage, worker, error = %e, "stage handler failed");
        }

        if let Err(e) = subscription.ack(&delivery).await {
            tracing::warn!(stage, worker, offset = delivery.offset, error = %e, "ack failed");
        }
    }

    tracing::info!(stage, worker, "stage worker stopped");
}
