//! HTTP API server
//!
//! Serves the liveness probe, the Telegram webhook (when the bot runs in
//! webhook mode) and a read-only preview of what a fetch would produce.

pub mod health;
pub mod posts;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::fetcher::ContentFetcher;
use crate::Result;

pub use webhook::WebhookState;

/// Shared state for API handlers
#[derive(Default)]
pub struct ApiState {
    /// Present when Telegram updates arrive by webhook
    pub webhook: Option<WebhookState>,

    /// Present when the posts preview is enabled
    pub fetcher: Option<ContentFetcher>,
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhook::router(state.clone()))
        .merge(posts::router(state))
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the API server until `shutdown` flips
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
