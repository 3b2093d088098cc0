//! TOML configuration file loading
//!
//! Supports `~/.config/talkfeed/config.toml` (or `TALKFEED_CONFIG`) as a
//! persistent config source. Every field is optional; the file is a partial
//! overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub telegram: TelegramFileConfig,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub broker: BrokerFileConfig,

    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Bot API and channel preview settings
#[derive(Debug, Default, Deserialize)]
pub struct TelegramFileConfig {
    pub bot_token: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub webhook_secret: Option<String>,
    pub preview_url: Option<String>,
}

/// Speech provider settings
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Path to a Google service account key
    pub credentials_file: Option<String>,
    pub language_code: Option<String>,
    pub name: Option<String>,
    /// `FEMALE`, `MALE` or `NEUTRAL`
    pub gender: Option<String>,
}

/// Message broker settings
#[derive(Debug, Default, Deserialize)]
pub struct BrokerFileConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub stream: Option<String>,
    pub requests_topic: Option<String>,
    pub texts_topic: Option<String>,
    pub group_id: Option<String>,
    pub partitions: Option<u32>,
}

/// Worker and fan-out settings
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    pub workers: Option<usize>,
    pub handlers: Option<usize>,
    pub fetch_limit: Option<usize>,
    pub synth_concurrency: Option<usize>,
}

/// HTTP server settings
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    pub shutdown_timeout_secs: Option<u64>,
}

/// Load the TOML config file from `TALKFEED_CONFIG` or the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let path = std::env::var("TALKFEED_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path);

    path.map_or_else(ConfigFile::default, |p| load_from(&p))
}

/// Load a config file from an explicit path
pub fn load_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/talkfeed/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("talkfeed").join("config.toml"))
}
