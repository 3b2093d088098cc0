//! Channel preview endpoint
//!
//! `GET /posts?channel=<name or link>&hours=<N>` returns the normalized texts a
//! request for that channel would synthesize, keyed by unix second.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::conversation::{DEFAULT_WINDOW_HOURS, normalize_channel};
use crate::pipeline::build_texts;
use crate::pipeline::envelope::MAX_WINDOW_HOURS;
use crate::Error;

#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    pub channel: String,
    pub hours: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PostsResponse {
    pub channel: String,
    pub hours: u32,
    pub texts: BTreeMap<i64, String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn reject(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

async fn list_posts(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PostsQuery>,
) -> ApiResult<PostsResponse> {
    let Some(fetcher) = &state.fetcher else {
        return Err(reject(StatusCode::NOT_FOUND, "posts preview disabled"));
    };

    let channel = normalize_channel(&query.channel)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "invalid channel"))?;
    let hours = query.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
    if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            format!("hours must be between 1 and {MAX_WINDOW_HOURS}"),
        ));
    }

    match fetcher.fetch(&channel, hours).await {
        Ok(posts) => Ok(Json(PostsResponse {
            channel,
            hours,
            texts: build_texts(&posts),
        })),
        Err(Error::ChannelNotFound(_)) => {
            Err(reject(StatusCode::NOT_FOUND, format!("channel @{channel} not found")))
        }
        Err(e) => {
            tracing::warn!(channel, error = %e, "posts preview fetch failed");
            Err(reject(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// Build posts router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/posts", get(list_posts))
        .with_state(state)
}
