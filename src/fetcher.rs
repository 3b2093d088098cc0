//! Windowed channel fetch

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::channels::{Post, PostSource};
use crate::{Error, Result};

/// Most recent posts requested per fetch
pub const DEFAULT_FETCH_LIMIT: usize = 100;

/// Fetches the posts of a channel that fall within a lookback window
#[derive(Clone)]
pub struct ContentFetcher {
    source: Arc<dyn PostSource>,
    limit: usize,
}

impl ContentFetcher {
    #[must_use]
    pub fn new(source: Arc<dyn PostSource>, limit: usize) -> Self {
        Self {
            source,
            limit: limit.max(1),
        }
    }

    /// Posts from the last `window_hours`, newest first
    ///
    /// An empty result means nothing was posted in the window.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelNotFound` for unknown channels and `Error::Fetch`
    /// for any other upstream failure
    pub async fn fetch(&self, channel: &str, window_hours: u32) -> Result<Vec<Post>> {
        self.fetch_at(channel, window_hours, Utc::now()).await
    }

    /// [`fetch`](Self::fetch) with an explicit current time
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch)
    pub async fn fetch_at(
        &self,
        channel: &str,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        let peer = self
            .source
            .resolve_channel(channel)
            .await
            .map_err(into_fetch_error)?;

        let posts = self
            .source
            .fetch_recent_posts(&peer, self.limit)
            .await
            .map_err(into_fetch_error)?;

        let threshold = Duration::try_hours(i64::from(window_hours))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| Error::Fetch(format!("window of {window_hours} h is out of range")))?;
        let recent = within_window(posts, threshold);

        tracing::debug!(channel, window_hours, count = recent.len(), "fetched channel window");
        Ok(recent)
    }
}

impl std::fmt::Debug for ContentFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFetcher")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

/// Keep the leading run of posts at or after `threshold`
///
/// Posts arrive newest first, so scanning stops at the first older post.
#[must_use]
pub fn within_window(posts: Vec<Post>, threshold: DateTime<Utc>) -> Vec<Post> {
    posts
        .into_iter()
        .take_while(|post| post.published_at >= threshold)
        .collect()
}

fn into_fetch_error(e: Error) -> Error {
    match e {
        Error::ChannelNotFound(_) | Error::Fetch(_) => e,
        other => Error::Fetch(other.to_string()),
    }
}
