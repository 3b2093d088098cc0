//! Short-lived seen-set for at-least-once deliveries
//!
//! Used for Telegram update ids and for pipeline envelopes keyed by
//! `(chat_id, submitted_at)`.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Default dedup TTL (5 minutes)
const DEDUP_TTL_SECS: u64 = 300;

/// Maximum dedup cache entries
const DEDUP_MAX_ENTRIES: usize = 2000;

/// TTL-bounded seen-set with a hard cap on entries
#[derive(Debug)]
pub struct SeenSet<K> {
    cache: HashMap<K, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl<K: Eq + Hash + Clone> Default for SeenSet<K> {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEDUP_TTL_SECS), DEDUP_MAX_ENTRIES)
    }
}

impl<K: Eq + Hash + Clone> SeenSet<K> {
    /// Create a seen-set with a custom TTL and capacity
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Check if the given key has been seen recently.
    ///
    /// Returns `true` if this is a duplicate (already seen within TTL).
    /// Returns `false` on first sight and records the key.
    pub fn is_duplicate(&mut self, key: &K) -> bool {
        let now = Instant::now();

        if let Some(ts) = self.cache.get(key)
            && now.duration_since(*ts) < self.ttl
        {
            return true;
        }

        // Evict expired entries when at capacity
        if self.cache.len() >= self.max_entries {
            self.cache.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        // Still full: drop the oldest
        if self.cache.len() >= self.max_entries
            && let Some(oldest) = self
                .cache
                .iter()
                .min_by_key(|(_, ts)| **ts)
                .map(|(k, _)| k.clone())
        {
            self.cache.remove(&oldest);
        }

        self.cache.insert(key.clone(), now);
        false
    }

    /// Forget a key so a later delivery is processed again
    pub fn forget(&mut self, key: &K) {
        self.cache.remove(key);
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
