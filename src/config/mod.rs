//! Configuration management for talkfeed
//!
//! Every setting resolves as environment variable, then TOML file, then
//! default. An environment value that fails to parse falls through to the
//! next layer.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::broker::IggyConfig;
use crate::channels::telegram::preview::DEFAULT_PREVIEW_BASE;
use crate::fetcher::DEFAULT_FETCH_LIMIT;
use crate::voice::VoiceParams;
use crate::{Error, Result};

use file::ConfigFile;

/// talkfeed configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub voice: VoiceConfig,
    pub broker: BrokerConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

/// Bot API and channel preview configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token (`TG_BOT_TOKEN`)
    pub bot_token: Option<SecretString>,

    /// Pause between getUpdates calls
    pub poll_interval: Duration,

    /// Expected `X-Telegram-Bot-Api-Secret-Token` for webhook deliveries
    pub webhook_secret: Option<SecretString>,

    /// Base URL of the public channel preview
    pub preview_url: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Google service account key (`GOOGLE_CREDENTIALS_FILE`)
    pub credentials_file: Option<PathBuf>,

    /// Voice used for every unit
    pub params: VoiceParams,
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub username: String,
    pub password: SecretString,
    pub stream: String,
    /// Hop 1: conversation to fetch stage
    pub requests_topic: String,
    /// Hop 2: fetch stage to synth stage
    pub texts_topic: String,
    /// Consumer group shared by stage workers
    pub group_id: String,
    pub partitions: u32,
}

/// Concurrency configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workers per stage
    pub workers: usize,
    /// Concurrent conversation handlers
    pub handlers: usize,
    /// Most recent posts requested per fetch
    pub fetch_limit: usize,
    /// In-flight TTS calls per batch
    pub synth_concurrency: usize,
}

/// HTTP API configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// How long to wait for in-flight work on shutdown
    pub shutdown_timeout: Duration,
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a file overlay and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range
    pub fn from_sources(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram = TelegramConfig {
            bot_token: env("TG_BOT_TOKEN")
                .or(fc.telegram.bot_token)
                .filter(|t| !t.trim().is_empty())
                .map(SecretString::from),
            poll_interval: Duration::from_millis(
                parsed(&env, "TALKFEED_POLL_INTERVAL_MS")
                    .or(fc.telegram.poll_interval_ms)
                    .unwrap_or(1000),
            ),
            webhook_secret: env("TALKFEED_WEBHOOK_SECRET")
                .or(fc.telegram.webhook_secret)
                .map(SecretString::from),
            preview_url: env("TALKFEED_PREVIEW_URL")
                .or(fc.telegram.preview_url)
                .unwrap_or_else(|| DEFAULT_PREVIEW_BASE.to_string()),
        };

        let defaults = VoiceParams::default();
        let voice = VoiceConfig {
            credentials_file: env("GOOGLE_CREDENTIALS_FILE")
                .or(fc.voice.credentials_file)
                .map(PathBuf::from),
            params: VoiceParams {
                language_code: env("TALKFEED_VOICE_LANGUAGE")
                    .or(fc.voice.language_code)
                    .unwrap_or(defaults.language_code),
                name: env("TALKFEED_VOICE_NAME")
                    .or(fc.voice.name)
                    .unwrap_or(defaults.name),
                gender: env("TALKFEED_VOICE_GENDER")
                    .or(fc.voice.gender)
                    .map_or(defaults.gender, |g| g.to_uppercase()),
            },
        };

        let broker = BrokerConfig {
            url: env("IGGY_URL")
                .or(fc.broker.url)
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            username: env("IGGY_USERNAME")
                .or(fc.broker.username)
                .unwrap_or_else(|| "iggy".to_string()),
            password: SecretString::from(
                env("IGGY_PASSWORD")
                    .or(fc.broker.password)
                    .unwrap_or_else(|| "iggy".to_string()),
            ),
            stream: env("IGGY_STREAM")
                .or(fc.broker.stream)
                .unwrap_or_else(|| "talkfeed".to_string()),
            requests_topic: env("NAME_KAFKA_TOPIC")
                .or(fc.broker.requests_topic)
                .unwrap_or_else(|| "requests".to_string()),
            texts_topic: env("TALKFEED_TEXTS_TOPIC")
                .or(fc.broker.texts_topic)
                .unwrap_or_else(|| "texts".to_string()),
            group_id: env("KAFKA_GROUP_ID")
                .or(fc.broker.group_id)
                .unwrap_or_else(|| "talkfeed".to_string()),
            partitions: fc.broker.partitions.unwrap_or(2),
        };

        let pipeline = PipelineConfig {
            workers: parsed(&env, "TALKFEED_WORKERS")
                .or(fc.pipeline.workers)
                .unwrap_or(1),
            handlers: parsed(&env, "TALKFEED_HANDLERS")
                .or(fc.pipeline.handlers)
                .unwrap_or(16),
            fetch_limit: fc.pipeline.fetch_limit.unwrap_or(DEFAULT_FETCH_LIMIT),
            synth_concurrency: fc.pipeline.synth_concurrency.unwrap_or(4),
        };

        let server = ServerConfig {
            port: parsed(&env, "SERVER_PORT")
                .or(fc.server.port)
                .unwrap_or(8080),
            shutdown_timeout: Duration::from_secs(fc.server.shutdown_timeout_secs.unwrap_or(5)),
        };

        let config = Self {
            telegram,
            voice,
            broker,
            pipeline,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.broker.partitions == 0 {
            return Err(Error::Config("broker.partitions must be at least 1".to_string()));
        }
        if self.pipeline.workers == 0 || self.pipeline.handlers == 0 {
            return Err(Error::Config(
                "pipeline workers and handlers must be at least 1".to_string(),
            ));
        }
        if self.pipeline.synth_concurrency == 0 || self.pipeline.fetch_limit == 0 {
            return Err(Error::Config(
                "pipeline fetch_limit and synth_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The bot token, required by every role that talks to chats
    ///
    /// # Errors
    ///
    /// Returns error if `TG_BOT_TOKEN` is not set
    pub fn bot_token(&self) -> Result<SecretString> {
        self.telegram
            .bot_token
            .clone()
            .ok_or_else(|| Error::Config("TG_BOT_TOKEN is not set".to_string()))
    }

    /// The Google credentials path, required by the synth role
    ///
    /// # Errors
    ///
    /// Returns error if `GOOGLE_CREDENTIALS_FILE` is not set
    pub fn credentials_file(&self) -> Result<&PathBuf> {
        self.voice
            .credentials_file
            .as_ref()
            .ok_or_else(|| Error::Config("GOOGLE_CREDENTIALS_FILE is not set".to_string()))
    }

    /// Iggy connection settings
    #[must_use]
    pub fn iggy(&self) -> IggyConfig {
        IggyConfig {
            base_url: self.broker.url.clone(),
            username: self.broker.username.clone(),
            password: self.broker.password.expose_secret().to_string(),
            stream: self.broker.stream.clone(),
            partitions: self.broker.partitions,
            ..IggyConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use file::{BrokerFileConfig, PipelineFileConfig, TelegramFileConfig};

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = Config::from_sources(ConfigFile::default(), env_of(&[])).unwrap();
        assert!(config.telegram.bot_token.is_none());
        assert_eq!(config.telegram.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.telegram.preview_url, "https://t.me/s");
        assert_eq!(config.voice.params, VoiceParams::default());
        assert_eq!(config.broker.url, "http://localhost:3000");
        assert_eq!(config.broker.requests_topic, "requests");
        assert_eq!(config.broker.texts_topic, "texts");
        assert_eq!(config.broker.group_id, "talkfeed");
        assert_eq!(config.pipeline.workers, 1);
        assert_eq!(config.pipeline.handlers, 16);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(5));
        assert!(config.bot_token().is_err());
        assert!(config.credentials_file().is_err());
    }

    #[test]
    fn env_overrides_file() {
        let fc = ConfigFile {
            broker: BrokerFileConfig {
                requests_topic: Some("from-file".to_string()),
                texts_topic: Some("texts-file".to_string()),
                ..BrokerFileConfig::default()
            },
            telegram: TelegramFileConfig {
                bot_token: Some("file-token".to_string()),
                ..TelegramFileConfig::default()
            },
            ..ConfigFile::default()
        };
        let env = env_of(&[("NAME_KAFKA_TOPIC", "from-env"), ("TG_BOT_TOKEN", "env-token")]);
        let config = Config::from_sources(fc, env).unwrap();

        assert_eq!(config.broker.requests_topic, "from-env");
        assert_eq!(config.broker.texts_topic, "texts-file");
        assert_eq!(config.bot_token().unwrap().expose_secret(), "env-token");
    }

    #[test]
    fn unparseable_env_number_falls_through() {
        let fc = ConfigFile {
            pipeline: PipelineFileConfig {
                workers: Some(3),
                ..PipelineFileConfig::default()
            },
            ..ConfigFile::default()
        };
        let env = env_of(&[("TALKFEED_WORKERS", "many"), ("SERVER_PORT", "9090")]);
        let config = Config::from_sources(fc, env).unwrap();
        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn zero_workers_rejected() {
        let env = env_of(&[("TALKFEED_WORKERS", "0")]);
        assert!(matches!(
            Config::from_sources(ConfigFile::default(), env),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn iggy_settings_follow_broker_config() {
        let env = env_of(&[("IGGY_URL", "http://iggy:3000"), ("IGGY_PASSWORD", "s3cret")]);
        let config = Config::from_sources(ConfigFile::default(), env).unwrap();
        let iggy = config.iggy();
        assert_eq!(iggy.base_url, "http://iggy:3000");
        assert_eq!(iggy.password, "s3cret");
        assert_eq!(iggy.partitions, 2);
    }

    #[test]
    fn gender_is_uppercased_and_blank_token_ignored() {
        let env = env_of(&[("TALKFEED_VOICE_GENDER", "male"), ("TG_BOT_TOKEN", "  ")]);
        let config = Config::from_sources(ConfigFile::default(), env).unwrap();
        assert_eq!(config.voice.params.gender, "MALE");
        assert!(config.telegram.bot_token.is_none());
    }
}
