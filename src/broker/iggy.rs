//! Apache Iggy broker over its HTTP REST API
//!
//! Topics live in one stream. Payloads travel base64-encoded; publishing uses
//! balanced partitioning. Consumers poll every partition by explicit offset
//! and store the committed offset after processing, never auto-committing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::{AckTracker, Broker, Delivery, Subscription};
use crate::{Error, Result};

/// Connection settings for an Iggy server
#[derive(Debug, Clone)]
pub struct IggyConfig {
    /// HTTP base URL (e.g., `http://localhost:3000`)
    pub base_url: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Stream holding all topics
    pub stream: String,
    /// Partitions for newly created topics
    pub partitions: u32,
    /// Pause between empty polls
    pub poll_interval: Duration,
}

impl Default for IggyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            username: "iggy".to_string(),
            password: "iggy".to_string(),
            stream: "talkfeed".to_string(),
            partitions: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Iggy-backed broker
#[derive(Clone)]
pub struct IggyBroker {
    client: reqwest::Client,
    config: Arc<IggyConfig>,
    /// Cached bearer token, shared by publishers and subscriptions
    token: Arc<RwLock<Option<String>>>,
}

impl IggyBroker {
    #[must_use]
    pub fn new(config: IggyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: Arc::new(config),
            token: Arc::new(RwLock::new(None)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn topic_path(&self, topic: &str) -> String {
        format!("/streams/{}/topics/{topic}", self.config.stream)
    }

    /// Retrieve the cached token, authenticating if the cache is empty.
    async fn cached_token(&self) -> anyhow::Result<String> {
        {
            let r = self.token.read().await;
            if let Some(t) = r.as_ref() {
                return Ok(t.clone());
            }
        }
        let mut w = self.token.write().await;
        // Another task may have authenticated meanwhile
        if let Some(t) = w.as_ref() {
            return Ok(t.clone());
        }
        let t = self.login().await?;
        *w = Some(t.clone());
        Ok(t)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn login(&self) -> anyhow::Result<String> {
        let resp: LoginResponse = self
            .client
            .post(self.url("/users/login"))
            .json(&LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!(url = %self.config.base_url, "authenticated with Iggy");
        Ok(resp.tokens.access.token)
    }

    /// Run an operation with a token, dropping the token if it fails
    async fn with_token<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let token = self
            .cached_token()
            .await
            .map_err(|e| Error::Broker(format!("Iggy login failed: {e:#}")))?;
        match op(token).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.invalidate_token().await;
                Err(Error::Broker(format!("{e:#}")))
            }
        }
    }

    async fn ensure_stream(&self, token: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .get(self.url(&format!("/streams/{}", self.config.stream)))
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }

        let created = self
            .client
            .post(self.url("/streams"))
            .bearer_auth(token)
            .json(&CreateStreamRequest {
                name: &self.config.stream,
            })
            .send()
            .await?;
        // Someone else may have created it in between
        if !created.status().is_success() && created.status() != reqwest::StatusCode::CONFLICT {
            let status = created.status();
            let body = created.text().await.unwrap_or_default();
            anyhow::bail!("Iggy create stream failed: {status} - {body}");
        }
        tracing::info!(stream = %self.config.stream, "created Iggy stream");
        Ok(())
    }

    async fn partition_count(&self, token: &str, topic: &str) -> anyhow::Result<u32> {
        let details: TopicDetails = self
            .client
            .get(self.url(&self.topic_path(topic)))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(details.partitions_count.max(1))
    }

    async fn stored_offset(
        &self,
        token: &str,
        topic: &str,
        consumer_id: u32,
        partition: u32,
    ) -> anyhow::Result<Option<u64>> {
        let resp = self
            .client
            .get(self.url(&format!("{}/consumer-offsets", self.topic_path(topic))))
            .query(&[("consumer_id", consumer_id), ("partition_id", partition)])
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.error_for_status()?.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let info: ConsumerOffsetInfo = serde_json::from_str(&body)?;
        Ok(Some(info.stored_offset))
    }

    async fn store_offset(
        &self,
        token: &str,
        topic: &str,
        consumer_id: u32,
        partition: u32,
        offset: u64,
    ) -> anyhow::Result<()> {
        let resp = self
            .client
            .put(self.url(&format!("{}/consumer-offsets", self.topic_path(topic))))
            .bearer_auth(token)
            .json(&StoreOffsetRequest {
                consumer: ConsumerRef {
                    kind: "consumer",
                    id: consumer_id,
                },
                partition_id: partition,
                offset,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Iggy store offset failed: {status} - {body}");
        }
        Ok(())
    }

    async fn poll_one(
        &self,
        token: &str,
        topic: &str,
        consumer_id: u32,
        partition: u32,
        offset: u64,
    ) -> anyhow::Result<Option<(u64, Vec<u8>)>> {
        let resp: PolledMessages = self
            .client
            .get(self.url(&format!("{}/messages", self.topic_path(topic))))
            .query(&[
                ("consumer_id", consumer_id.to_string()),
                ("partition_id", partition.to_string()),
                ("kind", "offset".to_string()),
                ("value", offset.to_string()),
                ("count", "1".to_string()),
                ("auto_commit", "false".to_string()),
            ])
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(message) = resp.messages.into_iter().next() else {
            return Ok(None);
        };
        let message_offset = message
            .header
            .map(|h| h.offset)
            .or(message.offset)
            .unwrap_or(offset);
        let payload = base64::engine::general_purpose::STANDARD.decode(message.payload)?;
        Ok(Some((message_offset, payload)))
    }
}

impl std::fmt::Debug for IggyBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IggyBroker")
            .field("base_url", &self.config.base_url)
            .field("stream", &self.config.stream)
            .finish_non_exhaustive()
    }
}

/// Numeric consumer id derived from a group name
#[must_use]
pub fn consumer_id(group: &str) -> u32 {
    let digest = Sha256::digest(group.as_bytes());
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    id.max(1)
}

#[async_trait]
impl Broker for IggyBroker {
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        let this = self.clone();
        let topic = topic.to_string();
        self.with_token(|token| async move {
            this.ensure_stream(&token).await?;

            let resp = this
                .client
                .get(this.url(&this.topic_path(&topic)))
                .bearer_auth(&token)
                .send()
                .await?;
            if resp.status().is_success() {
                return Ok(());
            }

            let created = this
                .client
                .post(this.url(&format!("/streams/{}/topics", this.config.stream)))
                .bearer_auth(&token)
                .json(&CreateTopicRequest {
                    name: &topic,
                    partitions_count: this.config.partitions,
                    compression_algorithm: "none",
                    message_expiry: 0,
                    max_topic_size: 0,
                })
                .send()
                .await?;
            if !created.status().is_success() && created.status() != reqwest::StatusCode::CONFLICT {
                let status = created.status();
                let body = created.text().await.unwrap_or_default();
                anyhow::bail!("Iggy create topic failed: {status} - {body}");
            }
            tracing::info!(topic = %topic, partitions = this.config.partitions, "created Iggy topic");
            Ok(())
        })
        .await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let this = self.clone();
        let topic = topic.to_string();
        self.with_token(|token| async move {
            let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
            let resp = this
                .client
                .post(this.url(&format!("{}/messages", this.topic_path(&topic))))
                .bearer_auth(&token)
                .json(&SendMessagesRequest {
                    partitioning: Partitioning { kind: "balanced" },
                    messages: vec![IggyMessage { payload: encoded }],
                })
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Iggy send failed: {status} - {body}");
            }
            tracing::debug!(topic = %topic, "published message");
            Ok(())
        })
        .await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let id = consumer_id(group);
        let this = self.clone();
        let topic_owned = topic.to_string();

        let positions = self
            .with_token(|token| async move {
                let partitions = this.partition_count(&token, &topic_owned).await?;
                let mut positions = Vec::new();
                for partition in 1..=partitions {
                    let stored = this.stored_offset(&token, &topic_owned, id, partition).await?;
                    positions.push((partition, stored));
                }
                Ok(positions)
            })
            .await?;

        tracing::info!(topic, group, consumer_id = id, partitions = positions.len(), "subscribed");

        let cursors = positions
            .iter()
            .map(|(p, stored)| (*p, stored.map_or(0, |o| o + 1)))
            .collect();
        let trackers = positions
            .iter()
            .map(|(p, stored)| (*p, AckTracker::starting_at(*stored)))
            .collect();

        Ok(Box::new(IggySubscription {
            broker: self.clone(),
            topic: topic.to_string(),
            consumer_id: id,
            poll: tokio::sync::Mutex::new(PollState { cursors, turn: 0 }),
            trackers: Mutex::new(trackers),
        }))
    }
}

struct PollState {
    /// Next offset to poll per partition, in partition order
    cursors: Vec<(u32, u64)>,
    /// Round-robin position
    turn: usize,
}

struct IggySubscription {
    broker: IggyBroker,
    topic: String,
    consumer_id: u32,
    poll: tokio::sync::Mutex<PollState>,
    trackers: Mutex<HashMap<u32, AckTracker>>,
}

#[async_trait]
impl Subscription for IggySubscription {
    async fn next(&self) -> Result<Delivery> {
        let mut state = self.poll.lock().await;
        loop {
            let count = state.cursors.len();
            for _ in 0..count {
                let idx = state.turn % count;
                state.turn = state.turn.wrapping_add(1);
                let (partition, offset) = state.cursors[idx];

                let broker = self.broker.clone();
                let topic = self.topic.clone();
                let consumer_id = self.consumer_id;
                let polled = self
                    .broker
                    .with_token(|token| async move {
                        broker
                            .poll_one(&token, &topic, consumer_id, partition, offset)
                            .await
                    })
                    .await?;

                if let Some((message_offset, payload)) = polled {
                    state.cursors[idx].1 = message_offset + 1;
                    self.trackers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .entry(partition)
                        .or_default()
                        .delivered(message_offset);
                    return Ok(Delivery {
                        payload,
                        partition,
                        offset: message_offset,
                    });
                }
            }
            tokio::time::sleep(self.broker.config.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let commit = self
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(delivery.partition)
            .or_default()
            .acked(delivery.offset);

        let Some(offset) = commit else {
            return Ok(());
        };

        let broker = self.broker.clone();
        let topic = self.topic.clone();
        let consumer_id = self.consumer_id;
        let partition = delivery.partition;
        self.broker
            .with_token(|token| async move {
                broker
                    .store_offset(&token, &topic, consumer_id, partition, offset)
                    .await
            })
            .await
    }
}

// -- Private HTTP types --

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    tokens: LoginTokens,
}

#[derive(Debug, Deserialize)]
struct LoginTokens {
    access: AccessToken,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    token: String,
}

#[derive(Debug, Serialize)]
struct CreateStreamRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateTopicRequest<'a> {
    name: &'a str,
    partitions_count: u32,
    compression_algorithm: &'static str,
    message_expiry: u64,
    max_topic_size: u64,
}

#[derive(Debug, Deserialize)]
struct TopicDetails {
    #[serde(default)]
    partitions_count: u32,
}

#[derive(Debug, Serialize)]
struct SendMessagesRequest {
    partitioning: Partitioning,
    messages: Vec<IggyMessage>,
}

#[derive(Debug, Serialize)]
struct Partitioning {
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct IggyMessage {
    /// Base64-encoded payload
    payload: String,
}

#[derive(Debug, Deserialize)]
struct PolledMessages {
    #[serde(default)]
    messages: Vec<PolledMessage>,
}

#[derive(Debug, Deserialize)]
struct PolledMessage {
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    header: Option<PolledHeader>,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct PolledHeader {
    offset: u64,
}

#[derive(Debug, Deserialize)]
struct ConsumerOffsetInfo {
    stored_offset: u64,
}

#[derive(Debug, Serialize)]
struct StoreOffsetRequest {
    consumer: ConsumerRef,
    partition_id: u32,
    offset: u64,
}

#[derive(Debug, Serialize)]
struct ConsumerRef {
    kind: &'static str,
    id: u32,
}
