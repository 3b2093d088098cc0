//! talkfeed - Telegram channels read aloud
//!
//! A chat bot collects a channel, a lookback window and a speaking rate,
//! then two broker-connected stages turn the channel's recent posts into one
//! MP3 delivered back to the chat.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  requests  ┌──────────────┐   texts   ┌──────────────┐
//! │ Conversation │───────────▶│  FetchStage  │──────────▶│  SynthStage  │
//! │  (Telegram)  │   broker   │ preview+norm │  broker   │  TTS + send  │
//! └──────────────┘            └──────────────┘           └──────────────┘
//! ```

pub mod api;
pub mod broker;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod pipeline;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
