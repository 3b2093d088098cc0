//! In-memory conversation state, one entry per chat

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::ConversationState;

/// Shared handle to one chat's state
pub type ChatEntry = Arc<Mutex<ConversationState>>;

/// Keyed store of conversation states
///
/// The map itself sits behind a reader/writer lock so lookups for different
/// chats run concurrently; each entry has its own mutex so mutations to the
/// same chat are serialized.
#[derive(Debug, Default)]
pub struct RequestStore {
    chats: RwLock<HashMap<i64, ChatEntry>>,
}

impl RequestStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for a chat, creating it on first use
    pub async fn entry(&self, chat_id: i64) -> ChatEntry {
        // Fast path: read-lock
        {
            let chats = self.chats.read().await;
            if let Some(entry) = chats.get(&chat_id) {
                return Arc::clone(entry);
            }
        }

        let mut chats = self.chats.write().await;
        Arc::clone(
            chats
                .entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(chat_id)))),
        )
    }

    /// Copy of a chat's current state, if it exists
    pub async fn snapshot(&self, chat_id: i64) -> Option<ConversationState> {
        let entry = self.chats.read().await.get(&chat_id).cloned()?;
        let state = entry.lock().await;
        Some(state.clone())
    }

    /// Number of known chats
    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }

    /// Whether no chat has interacted yet
    pub async fn is_empty(&self) -> bool {
        self.chats.read().await.is_empty()
    }
}
