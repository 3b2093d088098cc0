//! Fetch and synth stages

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::envelope::{EnvelopeKey, SubmitEnvelope, TextsEnvelope};
use super::{AUDIO_FILENAME, StageHandler, build_texts, messages, notify};
use crate::broker::Broker;
use crate::channels::ChatSender;
use crate::dedup::SeenSet;
use crate::fetcher::ContentFetcher;
use crate::voice::SpeechSynthesizer;
use crate::{Error, Result};

fn first_sight(seen: &Mutex<SeenSet<EnvelopeKey>>, key: Option<EnvelopeKey>) -> bool {
    key.is_none_or(|k| {
        !seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_duplicate(&k)
    })
}

/// Consumes submitted requests, fetches and normalizes posts, publishes texts
pub struct FetchStage {
    fetcher: ContentFetcher,
    broker: Arc<dyn Broker>,
    sender: Arc<dyn ChatSender>,
    texts_topic: String,
    seen: Mutex<SeenSet<EnvelopeKey>>,
}

impl FetchStage {
    #[must_use]
    pub fn new(
        fetcher: ContentFetcher,
        broker: Arc<dyn Broker>,
        sender: Arc<dyn ChatSender>,
        texts_topic: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            broker,
            sender,
            texts_topic: texts_topic.into(),
            seen: Mutex::new(SeenSet::default()),
        }
    }

    /// Fetch a channel window and build the normalized text map
    ///
    /// # Errors
    ///
    /// Propagates fetch errors
    pub async fn collect_texts(&self, channel: &str, window_hours: u32) -> Result<BTreeMap<i64, String>> {
        let posts = self.fetcher.fetch(channel, window_hours).await?;
        Ok(build_texts(&posts))
    }

    async fn run(&self, request: SubmitEnvelope) -> Result<()> {
        let chat_id = request.chat_id;
        let channel = request.channel.as_str();

        if let Err(e) = request.validate() {
            tracing::warn!(chat_id, error = %e, "rejecting invalid request");
            notify(self.sender.as_ref(), chat_id, messages::INVALID_REQUEST).await;
            return Ok(());
        }

        let texts = match self.collect_texts(channel, request.window_hours).await {
            Ok(texts) => texts,
            Err(Error::ChannelNotFound(_)) => {
                tracing::info!(chat_id, channel, "channel not found");
                notify(self.sender.as_ref(), chat_id, &messages::channel_not_found(channel)).await;
                return Ok(());
            }
            Err(e) => {
                tracing::error!(chat_id, channel, error = %e, "fetch failed");
                notify(self.sender.as_ref(), chat_id, messages::FETCH_FAILED).await;
                return Ok(());
            }
        };

        if texts.is_empty() {
            tracing::info!(chat_id, channel, window_hours = request.window_hours, "no recent content");
            notify(
                self.sender.as_ref(),
                chat_id,
                &messages::nothing_new(channel, request.window_hours),
            )
            .await;
            return Ok(());
        }

        let units = texts.len();
        let out = TextsEnvelope {
            chat_id,
            texts,
            speaking_rate: request.speaking_rate,
            channel: Some(request.channel.clone()),
            window_hours: Some(request.window_hours),
            submitted_at: request.submitted_at,
        };
        let payload = serde_json::to_vec(&out)?;

        if let Err(e) = self.broker.publish(&self.texts_topic, payload).await {
            tracing::error!(chat_id, error = %e, "failed to publish texts");
            notify(self.sender.as_ref(), chat_id, messages::DELIVERY_FAILED).await;
            return Ok(());
        }

        tracing::info!(chat_id, channel, units, "texts published");
        Ok(())
    }
}

#[async_trait]
impl StageHandler for FetchStage {
    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let request: SubmitEnvelope = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed request envelope");
                return Ok(());
            }
        };

        if !first_sight(&self.seen, request.key()) {
            tracing::debug!(chat_id = request.chat_id, "skipping duplicate request");
            return Ok(());
        }

        self.run(request).await
    }
}

/// Consumes text maps, synthesizes audio and delivers it to the chat
pub struct SynthStage {
    synthesizer: SpeechSynthesizer,
    sender: Arc<dyn ChatSender>,
    seen: Mutex<SeenSet<EnvelopeKey>>,
}

impl SynthStage {
    #[must_use]
    pub fn new(synthesizer: SpeechSynthesizer, sender: Arc<dyn ChatSender>) -> Self {
        Self {
            synthesizer,
            sender,
            seen: Mutex::new(SeenSet::default()),
        }
    }

    async fn run(&self, texts: TextsEnvelope) {
        let chat_id = texts.chat_id;

        if texts.texts.is_empty() {
            let channel = texts.channel.as_deref().unwrap_or("channel");
            notify(
                self.sender.as_ref(),
                chat_id,
                &messages::nothing_new(channel, texts.window_hours.unwrap_or(1)),
            )
            .await;
            return;
        }

        let audio = match self.synthesizer.synthesize(&texts.texts, texts.speaking_rate).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(chat_id, error = %e, "synthesis failed");
                notify(self.sender.as_ref(), chat_id, messages::SYNTH_FAILED).await;
                return;
            }
        };

        let bytes = audio.len();
        let caption = texts.caption();
        if let Err(e) = self
            .sender
            .send_audio(chat_id, audio, AUDIO_FILENAME, caption.as_deref())
            .await
        {
            tracing::error!(chat_id, error = %e, "audio delivery failed");
            notify(self.sender.as_ref(), chat_id, messages::DELIVERY_FAILED).await;
            return;
        }

        tracing::info!(chat_id, bytes, units = texts.texts.len(), "audio delivered");
    }
}

#[async_trait]
impl StageHandler for SynthStage {
    fn name(&self) -> &'static str {
        "synth"
    }

    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let texts: TextsEnvelope = match serde_json::from_slice(payload) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed texts envelope");
                return Ok(());
            }
        };

        if !first_sight(&self.seen, texts.key()) {
            tracing::debug!(chat_id = texts.chat_id, "skipping duplicate texts");
            return Ok(());
        }

        self.run(texts).await;
        Ok(())
    }
}
