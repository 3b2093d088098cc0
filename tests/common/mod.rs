//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use talkfeed::channels::{ChatSender, Keyboard, PeerRef, Post, PostSource};
use talkfeed::voice::{SpeechProvider, VoiceParams};
use talkfeed::{Error, Result};

/// Something the bot sent to a chat
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        chat_id: i64,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Audio {
        chat_id: i64,
        audio: Vec<u8>,
        filename: String,
        caption: Option<String>,
    },
}

impl Sent {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Audio { .. } => None,
        }
    }

    /// Menu replies always carry a keyboard; stage output never does
    pub const fn is_stage_output(&self) -> bool {
        matches!(self, Self::Audio { .. } | Self::Text { keyboard: None, .. })
    }
}

/// Records outbound messages; audio delivery can be made to fail
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Arc<Mutex<Vec<Sent>>>,
    pub fail_audio: bool,
}

impl RecordingSender {
    pub fn failing_audio() -> Self {
        Self {
            fail_audio: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<Sent> {
        self.sent.lock().await.clone()
    }

    pub async fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|s| s.text().map(ToString::to_string))
            .collect()
    }

    /// Wait until at least `n` stage messages were recorded
    pub async fn wait_for_stage_output(&self, n: usize) -> Vec<Sent> {
        for _ in 0..200 {
            let out: Vec<Sent> = self
                .sent()
                .await
                .into_iter()
                .filter(Sent::is_stage_output)
                .collect();
            if out.len() >= n {
                return out;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} stage messages, got {:?}", self.sent().await);
    }

    /// Wait until at least `n` messages were recorded
    pub async fn wait_for(&self, n: usize) -> Vec<Sent> {
        for _ in 0..200 {
            let sent = self.sent().await;
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} sent messages, got {:?}", self.sent().await);
    }
}

#[async_trait]
impl ChatSender for RecordingSender {
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<()> {
        self.sent.lock().await.push(Sent::Text {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn send_audio(
        &self,
        chat_id: i64,
        audio: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()> {
        if self.fail_audio {
            return Err(Error::Channel("Request Entity Too Large".to_string()));
        }
        self.sent.lock().await.push(Sent::Audio {
            chat_id,
            audio,
            filename: filename.to_string(),
            caption: caption.map(ToString::to_string),
        });
        Ok(())
    }
}

/// Channel posts served from memory, newest first
#[derive(Default)]
pub struct StaticSource {
    pub channels: HashMap<String, Vec<Post>>,
    /// Channels whose fetch fails with a transport error
    pub broken: Vec<String>,
}

impl StaticSource {
    pub fn with_channel(mut self, name: &str, posts: Vec<Post>) -> Self {
        self.channels.insert(name.to_string(), posts);
        self
    }

    pub fn with_broken(mut self, name: &str) -> Self {
        self.broken.push(name.to_string());
        self
    }
}

#[async_trait]
impl PostSource for StaticSource {
    async fn resolve_channel(&self, name: &str) -> Result<PeerRef> {
        if self.broken.iter().any(|b| b == name) {
            return Ok(PeerRef {
                username: name.to_string(),
                title: None,
            });
        }
        if !self.channels.contains_key(name) {
            return Err(Error::ChannelNotFound(name.to_string()));
        }
        Ok(PeerRef {
            username: name.to_string(),
            title: Some(name.to_uppercase()),
        })
    }

    async fn fetch_recent_posts(&self, peer: &PeerRef, limit: usize) -> Result<Vec<Post>> {
        if self.broken.contains(&peer.username) {
            return Err(Error::Fetch("connection reset by peer".to_string()));
        }
        Ok(self
            .channels
            .get(&peer.username)
            .map(|posts| posts.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Speech provider returning one marked silent MP3 per text
#[derive(Default)]
pub struct FakeTts {
    pub calls: Arc<Mutex<Vec<(String, f64)>>>,
    /// Texts containing this fragment fail
    pub fail_on: Option<String>,
}

impl FakeTts {
    pub fn failing_on(fragment: &str) -> Self {
        Self {
            fail_on: Some(fragment.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl SpeechProvider for FakeTts {
    async fn synthesize(&self, text: &str, _voice: &VoiceParams, rate: f64) -> Result<Vec<u8>> {
        self.calls.lock().await.push((text.to_string(), rate));
        if self.fail_on.as_deref().is_some_and(|f| text.contains(f)) {
            return Err(Error::Tts("429 quota exceeded".to_string()));
        }
        Ok(silent_mp3(text.len().to_le_bytes()[0], 3))
    }
}

/// MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, mono
const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0xC0];
const FRAME_LEN: usize = 417;

/// Short silent MP3 with `marker` in unused main data
pub fn silent_mp3(marker: u8, frames: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_LEN * frames);
    for _ in 0..frames {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&FRAME_HEADER);
        frame[100] = marker;
        out.extend_from_slice(&frame);
    }
    out
}

pub fn post(text: &str, published_at: DateTime<Utc>) -> Post {
    Post {
        text: text.to_string(),
        published_at,
    }
}

/// Posts from `minutes_ago` minutes before now, newest first
pub fn recent_posts(entries: &[(&str, i64)]) -> Vec<Post> {
    let now = Utc::now();
    entries
        .iter()
        .map(|(text, minutes_ago)| post(text, now - chrono::Duration::minutes(*minutes_ago)))
        .collect()
}
