//! Error types for talkfeed

use thiserror::Error;

/// Result type alias for talkfeed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while collecting, fetching, synthesizing or delivering a digest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Chat platform error (sending text or audio, Bot API failures)
    #[error("channel error: {0}")]
    Channel(String),

    /// The requested content channel does not exist or is not public
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Upstream transport failure while fetching posts
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Text-to-speech provider error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio validation error
    #[error("audio error: {0}")]
    Audio(String),

    /// Message broker error
    #[error("broker error: {0}")]
    Broker(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
