//! In-process broker
//!
//! Single partition per topic, committed offsets per consumer group. Used for
//! single-process runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{AckTracker, Broker, Delivery, Subscription};
use crate::{Error, Result};

struct Topic {
    messages: Vec<Vec<u8>>,
    committed: HashMap<String, u64>,
    len_tx: watch::Sender<usize>,
}

impl Topic {
    fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            messages: Vec::new(),
            committed: HashMap::new(),
            len_tx,
        }
    }
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    fail_publish: AtomicBool,
}

impl Inner {
    fn topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory broker; clones share the same topics
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail (or succeed again)
    pub fn fail_publishes(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// All payloads published to a topic so far
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .topics()
            .get(topic)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    /// Committed offset of a consumer group
    #[must_use]
    pub fn committed(&self, topic: &str, group: &str) -> Option<u64> {
        self.inner
            .topics()
            .get(topic)
            .and_then(|t| t.committed.get(group).copied())
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics: Vec<String> = self.inner.topics().keys().cloned().collect();
        f.debug_struct("MemoryBroker").field("topics", &topics).finish()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        self.inner
            .topics()
            .entry(topic.to_string())
            .or_insert_with(Topic::new);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Broker("publish rejected".to_string()));
        }

        let mut topics = self.inner.topics();
        let t = topics
            .get_mut(topic)
            .ok_or_else(|| Error::Broker(format!("unknown topic: {topic}")))?;
        t.messages.push(payload);
        t.len_tx.send_replace(t.messages.len());
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let topics = self.inner.topics();
        let t = topics
            .get(topic)
            .ok_or_else(|| Error::Broker(format!("unknown topic: {topic}")))?;
        let committed = t.committed.get(group).copied();

        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            len_rx: t.len_tx.subscribe(),
            cursor: Mutex::new(Cursor {
                next: committed.map_or(0, |c| c + 1),
                tracker: AckTracker::starting_at(committed),
            }),
        }))
    }
}

struct Cursor {
    next: u64,
    tracker: AckTracker,
}

struct MemorySubscription {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    len_rx: watch::Receiver<usize>,
    cursor: Mutex<Cursor>,
}

impl MemorySubscription {
    fn try_take(&self) -> std::result::Result<Delivery, u64> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let topics = self.inner.topics();
        let offset = cursor.next;
        let message = topics.get(&self.topic).and_then(|t| {
            usize::try_from(offset)
                .ok()
                .and_then(|i| t.messages.get(i).cloned())
        });

        match message {
            Some(payload) => {
                cursor.next += 1;
                cursor.tracker.delivered(offset);
                Ok(Delivery {
                    payload,
                    partition: 0,
                    offset,
                })
            }
            None => Err(offset),
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&self) -> Result<Delivery> {
        loop {
            match self.try_take() {
                Ok(delivery) => return Ok(delivery),
                Err(offset) => {
                    let mut rx = self.len_rx.clone();
                    rx.wait_for(|len| u64::try_from(*len).unwrap_or(u64::MAX) > offset)
                        .await
                        .map_err(|_| Error::Broker("topic closed".to_string()))?;
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(commit) = cursor.tracker.acked(delivery.offset) {
            let mut topics = self.inner.topics();
            if let Some(t) = topics.get_mut(&self.topic) {
                t.committed.insert(self.group.clone(), commit);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn publish_requires_topic() {
        let broker = MemoryBroker::new();
        assert!(broker.publish("missing", b"x".to_vec()).await.is_err());
        broker.ensure_topic("t").await.unwrap();
        broker.ensure_topic("t").await.unwrap();
        broker.publish("t", b"x".to_vec()).await.unwrap();
        assert_eq!(broker.messages("t"), vec![b"x".to_vec()]);
    }

    #[tokio::test]
    async fn next_waits_for_publish() {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t").await.unwrap();
        let sub = broker.subscribe("t", "g").await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", b"late".to_vec()).await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, b"late");
        assert_eq!(delivery.offset, 0);
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_resubscribe() {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t").await.unwrap();
        broker.publish("t", b"a".to_vec()).await.unwrap();
        broker.publish("t", b"b".to_vec()).await.unwrap();

        let sub = broker.subscribe("t", "g").await.unwrap();
        let a = sub.next().await.unwrap();
        sub.ack(&a).await.unwrap();
        let _b = sub.next().await.unwrap();
        drop(sub);

        assert_eq!(broker.committed("t", "g"), Some(0));
        let sub = broker.subscribe("t", "g").await.unwrap();
        assert_eq!(sub.next().await.unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn groups_consume_independently() {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t").await.unwrap();
        broker.publish("t", b"a".to_vec()).await.unwrap();

        let one = broker.subscribe("t", "one").await.unwrap();
        let two = broker.subscribe("t", "two").await.unwrap();
        assert_eq!(one.next().await.unwrap().payload, b"a");
        assert_eq!(two.next().await.unwrap().payload, b"a");
    }

    #[tokio::test]
    async fn failing_publish() {
        let broker = MemoryBroker::new();
        broker.ensure_topic("t").await.unwrap();
        broker.fail_publishes(true);
        assert!(matches!(
            broker.publish("t", vec![]).await,
            Err(Error::Broker(_))
        ));
        broker.fail_publishes(false);
        assert!(broker.publish("t", vec![]).await.is_ok());
    }
}
