//! Telegram webhook endpoint

use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::mpsc;

use super::ApiState;
use crate::channels::IncomingMessage;
use crate::channels::telegram::{Update, update_to_incoming};
use crate::dedup::SeenSet;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Inbound side of webhook mode
pub struct WebhookState {
    tx: mpsc::Sender<IncomingMessage>,
    secret: Option<SecretString>,
    seen: Mutex<SeenSet<i64>>,
}

impl WebhookState {
    /// Forward accepted updates into `tx`, checking `secret` when set
    #[must_use]
    pub fn new(tx: mpsc::Sender<IncomingMessage>, secret: Option<SecretString>) -> Self {
        Self {
            tx,
            secret,
            seen: Mutex::new(SeenSet::default()),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.secret else {
            return true;
        };
        headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|provided| provided == expected.expose_secret())
    }
}

/// Telegram webhook response
#[derive(Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
}

/// Accept one update
///
/// Telegram retries on non-2xx, so everything that is not an auth or
/// capacity problem is acknowledged.
async fn handle_update(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> (StatusCode, Json<WebhookResponse>) {
    let Some(webhook) = &state.webhook else {
        return (StatusCode::NOT_FOUND, Json(WebhookResponse { ok: false }));
    };

    if !webhook.authorized(&headers) {
        tracing::warn!("Telegram webhook secret mismatch");
        return (StatusCode::FORBIDDEN, Json(WebhookResponse { ok: false }));
    }

    let duplicate = webhook
        .seen
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .is_duplicate(&update.update_id);
    if duplicate {
        tracing::debug!(update_id = update.update_id, "duplicate update");
        return (StatusCode::OK, Json(WebhookResponse { ok: true }));
    }

    let Some(incoming) = update_to_incoming(&update) else {
        return (StatusCode::OK, Json(WebhookResponse { ok: true }));
    };

    if webhook.tx.send(incoming).await.is_err() {
        tracing::error!(update_id = update.update_id, "message handler is gone");
        webhook
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .forget(&update.update_id);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(WebhookResponse { ok: false }),
        );
    }

    (StatusCode::OK, Json(WebhookResponse { ok: true }))
}

/// Build webhook router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/telegram/webhook", post(handle_update))
        .with_state(state)
}
