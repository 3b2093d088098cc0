//! Topic-addressed message broker
//!
//! Delivery is at-least-once: a consumer position only advances past a
//! message once it has been acknowledged, so a consumer that dies mid-way
//! sees the message again after it resubscribes.

pub mod iggy;
pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;

pub use iggy::{IggyBroker, IggyConfig};
pub use memory::MemoryBroker;

use crate::Result;

/// One message handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Raw payload
    pub payload: Vec<u8>,
    /// Partition the message came from
    pub partition: u32,
    /// Offset within the partition
    pub offset: u64,
}

/// Publish side of the broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the topic if it does not exist yet
    async fn ensure_topic(&self, topic: &str) -> Result<()>;

    /// Append a message to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Join a consumer group on a topic
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>>;
}

/// Consume side of the broker
///
/// Shared between workers; `next` and `ack` may run concurrently.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Wait for the next message
    async fn next(&self) -> Result<Delivery>;

    /// Mark a message as processed
    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}

/// Tracks in-flight offsets for one partition and yields the commit point
///
/// Offsets may be acknowledged out of order; the commit point only moves
/// forward over a contiguous run of acknowledged offsets.
#[derive(Debug, Default)]
pub struct AckTracker {
    in_flight: BTreeSet<u64>,
    highest_delivered: Option<u64>,
    committed: Option<u64>,
}

impl AckTracker {
    /// Start from an already committed offset
    #[must_use]
    pub fn starting_at(committed: Option<u64>) -> Self {
        Self {
            in_flight: BTreeSet::new(),
            highest_delivered: committed,
            committed,
        }
    }

    /// Record a handed-out offset
    pub fn delivered(&mut self, offset: u64) {
        self.in_flight.insert(offset);
        self.highest_delivered = Some(self.highest_delivered.map_or(offset, |h| h.max(offset)));
    }

    /// Record an acknowledgement, returning the new commit point if it moved
    pub fn acked(&mut self, offset: u64) -> Option<u64> {
        self.in_flight.remove(&offset);

        let candidate = match self.in_flight.first() {
            Some(&0) => None,
            Some(&lowest) => Some(lowest - 1),
            None => self.highest_delivered,
        };

        match (candidate, self.committed) {
            (Some(c), Some(prev)) if c <= prev => None,
            (Some(c), _) => {
                self.committed = Some(c);
                Some(c)
            }
            (None, _) => None,
        }
    }

    /// Last committed offset
    #[must_use]
    pub const fn committed(&self) -> Option<u64> {
        self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_acks_advance() {
        let mut t = AckTracker::default();
        t.delivered(0);
        t.delivered(1);
        assert_eq!(t.acked(0), Some(0));
        assert_eq!(t.acked(1), Some(1));
    }

    #[test]
    fn out_of_order_ack_waits_for_gap() {
        let mut t = AckTracker::default();
        for o in 0..3 {
            t.delivered(o);
        }
        assert_eq!(t.acked(2), None);
        assert_eq!(t.acked(1), None);
        assert_eq!(t.acked(0), Some(2));
        assert_eq!(t.committed(), Some(2));
    }

    #[test]
    fn resumes_from_committed() {
        let mut t = AckTracker::starting_at(Some(9));
        t.delivered(10);
        t.delivered(11);
        assert_eq!(t.acked(11), None);
        assert_eq!(t.acked(10), Some(11));
    }
}
