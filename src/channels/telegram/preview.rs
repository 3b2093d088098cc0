//! Public channel reader backed by the `t.me/s/<channel>` web preview
//!
//! The preview lists roughly twenty posts per page, oldest first, and pages
//! backwards with `?before=<post id>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node, Selector};

use crate::channels::{PeerRef, Post, PostSource};
use crate::{Error, Result};

/// Default preview base URL
pub const DEFAULT_PREVIEW_BASE: &str = "https://t.me/s";

/// Upper bound on pages walked for one fetch
const MAX_PAGES: usize = 20;

/// A parsed preview page
#[derive(Debug, Default)]
pub(crate) struct PreviewPage {
    /// Channel title, present only for existing public channels
    pub title: Option<String>,
    /// Posts with their numeric ids, in page order (oldest first)
    pub posts: Vec<(u64, Post)>,
}

/// Reads channel posts from the public web preview
#[derive(Debug, Clone)]
pub struct PreviewSource {
    client: reqwest::Client,
    base_url: String,
}

impl PreviewSource {
    /// Create a reader for the given preview base URL
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_page(&self, username: &str, before: Option<u64>) -> Result<PreviewPage> {
        let mut url = format!("{}/{username}", self.base_url);
        if let Some(id) = before {
            url.push_str(&format!("?before={id}"));
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("preview request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(PreviewPage::default());
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Fetch(format!("preview returned {status} for {username}")));
        }

        let html = response
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("preview body read failed: {e}")))?;
        parse_page(&html)
    }
}

impl Default for PreviewSource {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_BASE)
    }
}

#[async_trait]
impl PostSource for PreviewSource {
    async fn resolve_channel(&self, name: &str) -> Result<PeerRef> {
        if !is_valid_username(name) {
            return Err(Error::ChannelNotFound(name.to_string()));
        }

        let page = self.fetch_page(name, None).await?;
        let Some(title) = page.title else {
            return Err(Error::ChannelNotFound(name.to_string()));
        };

        tracing::debug!(channel = name, title = %title, "resolved channel");
        Ok(PeerRef {
            username: name.to_string(),
            title: Some(title),
        })
    }

    async fn fetch_recent_posts(&self, peer: &PeerRef, limit: usize) -> Result<Vec<Post>> {
        let mut collected: Vec<(u64, Post)> = Vec::new();
        let mut before: Option<u64> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(&peer.username, before).await?;
            let Some(oldest) = page.posts.iter().map(|(id, _)| *id).min() else {
                break;
            };
            if before.is_some_and(|b| oldest >= b) {
                break;
            }

            // Older page goes in front to keep ascending order
            let mut merged = page.posts;
            merged.append(&mut collected);
            collected = merged;

            if collected.len() >= limit || oldest <= 1 {
                break;
            }
            before = Some(oldest);
        }

        let mut posts: Vec<Post> = collected.into_iter().rev().map(|(_, p)| p).collect();
        posts.truncate(limit);

        tracing::debug!(channel = %peer.username, count = posts.len(), "fetched preview posts");
        Ok(posts)
    }
}

/// Telegram public usernames: 4 to 32 of `[A-Za-z0-9_]`
#[must_use]
pub fn is_valid_username(name: &str) -> bool {
    (4..=32).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Fetch(format!("invalid selector {css}: {e}")))
}

/// Parse one preview page
pub(crate) fn parse_page(html: &str) -> Result<PreviewPage> {
    let doc = Html::parse_document(html);
    let info_sel = selector(".tgme_channel_info")?;
    let title_sel = selector(".tgme_channel_info_header_title")?;
    let message_sel = selector(".tgme_widget_message[data-post]")?;
    let text_sel = selector(".tgme_widget_message_text.js-message_text")?;
    let time_sel = selector(".tgme_widget_message_date time[datetime]")?;

    let title = doc.select(&info_sel).next().map(|info| {
        info.select(&title_sel)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    });

    let mut posts = Vec::new();
    for message in doc.select(&message_sel) {
        let Some(id) = message
            .value()
            .attr("data-post")
            .and_then(|p| p.rsplit('/').next())
            .and_then(|id| id.parse::<u64>().ok())
        else {
            continue;
        };

        let Some(published_at) = message
            .select(&time_sel)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(|dt| DateTime::parse_from_rfc3339(dt).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            continue;
        };

        let text = message
            .select(&text_sel)
            .next()
            .map(element_text)
            .unwrap_or_default();

        posts.push((id, Post { text, published_at }));
    }

    Ok(PreviewPage { title, posts })
}

/// Collect text content, turning `<br>` into line breaks
fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) if e.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out
}
