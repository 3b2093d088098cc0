//! Ordered batch synthesis
//!
//! Every unit shares one fixed encoding, so joining units is plain byte
//! concatenation of MP3 frame streams.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};

use super::{SpeechProvider, VoiceParams, validate_mp3};
use crate::pipeline::envelope::{MAX_SPEAKING_RATE, MIN_SPEAKING_RATE};
use crate::{Error, Result};

/// Runs provider calls for a batch and assembles one audio stream
#[derive(Clone)]
pub struct SpeechSynthesizer {
    provider: Arc<dyn SpeechProvider>,
    voice: VoiceParams,
    concurrency: usize,
}

impl SpeechSynthesizer {
    /// `concurrency` caps in-flight provider calls (at least one)
    #[must_use]
    pub fn new(provider: Arc<dyn SpeechProvider>, voice: VoiceParams, concurrency: usize) -> Self {
        Self {
            provider,
            voice,
            concurrency: concurrency.max(1),
        }
    }

    /// Synthesize all texts and concatenate the units in ascending key order
    ///
    /// Fails the whole batch on the first provider error or invalid unit.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts` for provider failures, an empty batch or an
    /// out-of-range rate, and `Error::Audio` for units that do not decode
    pub async fn synthesize(&self, texts: &BTreeMap<i64, String>, rate: f64) -> Result<Vec<u8>> {
        if !(MIN_SPEAKING_RATE..=MAX_SPEAKING_RATE).contains(&rate) {
            return Err(Error::Tts(format!("speaking rate {rate} out of range")));
        }
        if texts.is_empty() {
            return Err(Error::Tts("nothing to synthesize".to_string()));
        }

        let pending: Vec<_> = texts
            .iter()
            .map(|(key, text)| {
                synthesize_unit(
                    Arc::clone(&self.provider),
                    self.voice.clone(),
                    *key,
                    text.clone(),
                    rate,
                )
            })
            .collect();

        let units: Vec<Vec<u8>> = stream::iter(pending)
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(units.concat())
    }
}

/// One provider call plus validation, owning everything it touches
async fn synthesize_unit(
    provider: Arc<dyn SpeechProvider>,
    voice: VoiceParams,
    key: i64,
    text: String,
    rate: f64,
) -> Result<Vec<u8>> {
    let audio = provider.synthesize(&text, &voice, rate).await?;
    let frames = validate_mp3(&audio).map_err(|e| Error::Audio(format!("unit {key}: {e}")))?;
    tracing::debug!(key, frames, bytes = audio.len(), "unit ready");
    Ok(audio)
}

impl std::fmt::Debug for SpeechSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechSynthesizer")
            .field("voice", &self.voice)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::voice::test_audio::silent_mp3;

    /// Returns a unit marked with the text's first byte; sleeps so earlier keys finish last
    struct Scripted {
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechProvider for Scripted {
        async fn synthesize(&self, text: &str, _: &VoiceParams, _: f64) -> Result<Vec<u8>> {
            let delay = match text {
                "fifty" => 60,
                "seventy-five" => 30,
                _ => 0,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.completed.lock().unwrap().push(text.to_string());
            if text == "broken" {
                return Ok(b"garbage".to_vec());
            }
            if text == "fail" {
                return Err(Error::Tts("quota exceeded".to_string()));
            }
            Ok(silent_mp3(text.as_bytes()[0], 4))
        }
    }

    fn synth(concurrency: usize) -> (SpeechSynthesizer, Arc<Scripted>) {
        let provider = Arc::new(Scripted {
            completed: Mutex::new(Vec::new()),
        });
        (
            SpeechSynthesizer::new(provider.clone(), VoiceParams::default(), concurrency),
            provider,
        )
    }

    #[tokio::test]
    async fn concatenates_in_key_order_regardless_of_completion() {
        let (synth, provider) = synth(3);
        let texts = BTreeMap::from([
            (100, "hundred".to_string()),
            (50, "fifty".to_string()),
            (75, "seventy-five".to_string()),
        ]);

        let audio = synth.synthesize(&texts, 1.0).await.unwrap();

        let expected = [silent_mp3(b'f', 4), silent_mp3(b's', 4), silent_mp3(b'h', 4)].concat();
        assert_eq!(audio, expected);

        // Completion order differed from key order
        let completed = provider.completed.lock().unwrap().clone();
        assert_eq!(completed, vec!["hundred", "seventy-five", "fifty"]);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn batch_future_is_send() {
        let (synth, _) = synth(2);
        let texts = BTreeMap::from([(1, "ok".to_string()), (2, "also".to_string())]);
        let batch = synth.synthesize(&texts, 1.0);
        assert_send(&batch);
        assert_eq!(batch.await.unwrap().len(), 2 * silent_mp3(0, 4).len());

        // Runs inside a spawned task, as the synth stage does
        let shared = Arc::new(synth);
        let handle = tokio::spawn(async move { shared.synthesize(&texts, 1.0).await });
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn corrupt_unit_fails_batch() {
        let (synth, _) = synth(1);
        let texts = BTreeMap::from([(1, "ok".to_string()), (2, "broken".to_string())]);
        assert!(matches!(synth.synthesize(&texts, 1.0).await, Err(Error::Audio(_))));
    }

    #[tokio::test]
    async fn provider_error_fails_batch() {
        let (synth, _) = synth(2);
        let texts = BTreeMap::from([(1, "fail".to_string()), (2, "ok".to_string())]);
        assert!(matches!(synth.synthesize(&texts, 1.0).await, Err(Error::Tts(_))));
    }

    #[tokio::test]
    async fn rejects_out_of_range_rate_and_empty_batch() {
        let (synth, _) = synth(1);
        let texts = BTreeMap::from([(1, "ok".to_string())]);
        assert!(synth.synthesize(&texts, 5.0).await.is_err());
        assert!(synth.synthesize(&BTreeMap::new(), 1.0).await.is_err());
    }
}
