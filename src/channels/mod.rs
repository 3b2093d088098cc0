//! Chat platform capabilities
//!
//! The pipeline talks to the chat platform through two seams: [`ChatSender`]
//! for replies and audio delivery, and [`PostSource`] for reading a public
//! channel's recent posts.

pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use telegram::{PreviewSource, TelegramChannel};

use crate::Result;

/// A reply keyboard shown under the chat input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyboard {
    /// Button labels, row by row
    pub rows: Vec<Vec<String>>,
}

impl Keyboard {
    /// Build a keyboard from rows of labels
    #[must_use]
    pub fn new(rows: &[&[&str]]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|row| row.iter().map(|label| (*label).to_string()).collect())
                .collect(),
        }
    }
}

/// A text message from a user
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform update identifier, used for dedup
    pub update_id: i64,

    /// Conversation identifier
    pub chat_id: i64,

    /// Sender display name
    pub sender_name: String,

    /// Message text
    pub text: String,
}

/// A resolved reference to a content channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRef {
    /// Canonical channel username
    pub username: String,

    /// Display title, when the platform provides one
    pub title: Option<String>,
}

/// A single channel post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Raw post text
    pub text: String,

    /// Publication time
    pub published_at: DateTime<Utc>,
}

/// Outbound side of the chat platform
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Send a text message, optionally replacing the reply keyboard
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<()>;

    /// Send an audio file
    async fn send_audio(
        &self,
        chat_id: i64,
        audio: Vec<u8>,
        filename: &str,
        caption: Option<&str>,
    ) -> Result<()>;
}

/// Read side of the chat platform
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Resolve a channel name to a peer
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ChannelNotFound`] when no such public channel exists
    async fn resolve_channel(&self, name: &str) -> Result<PeerRef>;

    /// Fetch up to `limit` most recent posts, newest first
    async fn fetch_recent_posts(&self, peer: &PeerRef, limit: usize) -> Result<Vec<Post>>;
}
