//! Wire records carried across the broker hops

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Slowest accepted speaking rate
pub const MIN_SPEAKING_RATE: f64 = 0.2;

/// Fastest accepted speaking rate
pub const MAX_SPEAKING_RATE: f64 = 4.0;

/// Longest accepted lookback window in hours
pub const MAX_WINDOW_HOURS: u32 = 720;

/// Dedup key: `(chat_id, submitted_at)`
pub type EnvelopeKey = (i64, i64);

/// Hop 1: a submitted request, conversation to fetch stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEnvelope {
    /// Originating conversation
    #[serde(rename = "chatID")]
    pub chat_id: i64,

    /// Bare channel username
    pub channel: String,

    /// Lookback window in hours
    pub window_hours: u32,

    /// Speech rate multiplier
    pub speaking_rate: f64,

    /// Submission time in unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<i64>,
}

impl SubmitEnvelope {
    /// Reject values outside the accepted ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending field
    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(Error::Config("channel is empty".to_string()));
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.window_hours) {
            return Err(Error::Config(format!(
                "window of {} h outside [1, {MAX_WINDOW_HOURS}]",
                self.window_hours
            )));
        }
        if !(MIN_SPEAKING_RATE..=MAX_SPEAKING_RATE).contains(&self.speaking_rate) {
            return Err(Error::Config(format!(
                "speaking rate {} outside [{MIN_SPEAKING_RATE}, {MAX_SPEAKING_RATE}]",
                self.speaking_rate
            )));
        }
        Ok(())
    }

    /// Identity used to skip redelivered envelopes
    #[must_use]
    pub fn key(&self) -> Option<EnvelopeKey> {
        self.submitted_at.map(|ts| (self.chat_id, ts))
    }
}

/// Hop 2: normalized texts keyed by unix timestamp, fetch to synth stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextsEnvelope {
    /// Originating conversation
    #[serde(rename = "chatID")]
    pub chat_id: i64,

    /// Normalized texts by publication time (unix seconds)
    pub texts: BTreeMap<i64, String>,

    /// Speech rate multiplier
    pub speaking_rate: f64,

    /// Source channel, for the delivery caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Lookback window in hours, for the delivery caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_hours: Option<u32>,

    /// Carried over from the submit envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<i64>,
}

impl TextsEnvelope {
    /// Identity used to skip redelivered envelopes
    #[must_use]
    pub fn key(&self) -> Option<EnvelopeKey> {
        self.submitted_at.map(|ts| (self.chat_id, ts))
    }

    /// Caption shown under the delivered audio
    #[must_use]
    pub fn caption(&self) -> Option<String> {
        let channel = self.channel.as_deref()?;
        Some(match self.window_hours {
            Some(h) => format!("@{channel}, последние {h} ч."),
            None => format!("@{channel}"),
        })
    }
}
