//! Speech synthesis
//!
//! A [`SpeechProvider`] turns one text into one MP3 unit; the
//! [`SpeechSynthesizer`] runs a batch of units in key order and joins them.

pub mod google;
pub mod synthesizer;

use std::io::Cursor;

use async_trait::async_trait;

pub use google::GoogleTts;
pub use synthesizer::SpeechSynthesizer;

use crate::{Error, Result};

/// Fixed voice selection passed with every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    /// BCP-47 language code (e.g., `ru-RU`)
    pub language_code: String,
    /// Provider voice name
    pub name: String,
    /// `FEMALE`, `MALE` or `NEUTRAL`
    pub gender: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            language_code: "ru-RU".to_string(),
            name: "ru-RU-Standard-B".to_string(),
            gender: "FEMALE".to_string(),
        }
    }
}

/// Text-to-speech backend producing MP3
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Synthesize one text at the given speaking rate
    async fn synthesize(&self, text: &str, voice: &VoiceParams, rate: f64) -> Result<Vec<u8>>;
}

/// A unit fails when more than 1/N of its bytes are not decodable frames
const MAX_SKIPPED_SHARE: usize = 4;

/// Decode an MP3 unit frame by frame and return the frame count
///
/// The decoder silently resyncs over bytes it cannot parse, so the bytes
/// covered by decoded frames are tallied and a unit dominated by anything
/// else is rejected.
///
/// # Errors
///
/// Returns `Error::Audio` if a frame fails to decode, no frame is found, or
/// too much of the unit is not MP3 frames
pub fn validate_mp3(data: &[u8]) -> Result<usize> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut frames = 0;
    let mut covered = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                frames += 1;
                covered += frame_len_upper_bound(&frame);
            }
            Err(minimp3::Error::Eof) => break,
            // ID3 tags and padding between frames
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if frames == 0 {
        return Err(Error::Audio("no MP3 frames found".to_string()));
    }

    let skipped = data.len().saturating_sub(covered);
    if skipped * MAX_SKIPPED_SHARE > data.len() {
        return Err(Error::Audio(format!(
            "{skipped} of {} bytes are not MP3 frames",
            data.len()
        )));
    }
    Ok(frames)
}

/// Frame size in bytes from its header fields, counting a padding slot
fn frame_len_upper_bound(frame: &minimp3::Frame) -> usize {
    let bitrate = usize::try_from(frame.bitrate).unwrap_or(0) * 1000;
    let sample_rate = usize::try_from(frame.sample_rate).unwrap_or(0);
    if sample_rate == 0 {
        return 0;
    }

    let (coefficient, slot) = match frame.layer {
        1 => (12, 4),
        // MPEG-2 and 2.5 carry half the samples per Layer III frame
        3 if sample_rate < 32_000 => (72, 1),
        _ => (144, 1),
    };
    (coefficient * bitrate / sample_rate + 1) * slot
}
