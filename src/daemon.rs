//! Daemon - the main service
//!
//! Wires the Telegram bot, the fetch and synth stages and the HTTP API onto
//! one broker, then runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::{ApiServer, ApiState, WebhookState};
use crate::broker::{Broker, IggyBroker, MemoryBroker};
use crate::channels::{ChatSender, IncomingMessage, PreviewSource, TelegramChannel};
use crate::conversation::{ConversationController, RequestStore};
use crate::fetcher::ContentFetcher;
use crate::pipeline::{FetchStage, StageHandler, SynthStage, spawn_workers};
use crate::voice::{GoogleTts, SpeechSynthesizer};
use crate::{Config, Result};

/// Inbound message queue depth
const INBOUND_QUEUE: usize = 256;

/// Which parts of the pipeline this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bot, both stages and the API
    All,
    /// Conversation only
    Bot,
    /// Fetch stage only
    Fetcher,
    /// Synth stage only
    Synth,
}

impl Role {
    const fn runs_bot(self) -> bool {
        matches!(self, Self::All | Self::Bot)
    }

    const fn runs_fetcher(self) -> bool {
        matches!(self, Self::All | Self::Fetcher)
    }

    const fn runs_synth(self) -> bool {
        matches!(self, Self::All | Self::Synth)
    }
}

/// The talkfeed daemon
pub struct Daemon {
    config: Config,
    role: Role,
    broker: Arc<dyn Broker>,
}

impl Daemon {
    /// Create a daemon on the configured Iggy server, or in-process when
    /// `memory_broker` is set
    #[must_use]
    pub fn new(config: Config, role: Role, memory_broker: bool) -> Self {
        let broker: Arc<dyn Broker> = if memory_broker {
            tracing::info!("using in-process broker");
            Arc::new(MemoryBroker::new())
        } else {
            tracing::info!(url = %config.broker.url, stream = %config.broker.stream, "using Iggy broker");
            Arc::new(IggyBroker::new(config.iggy()))
        };
        Self::with_broker(config, role, broker)
    }

    /// Create a daemon on an explicit broker
    #[must_use]
    pub fn with_broker(config: Config, role: Role, broker: Arc<dyn Broker>) -> Self {
        Self {
            config,
            role,
            broker,
        }
    }

    /// Run the daemon until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if required configuration is missing or the broker
    /// cannot be prepared
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        self.run_until(shutdown_rx).await
    }

    /// Run the daemon until `shutdown` flips
    ///
    /// # Errors
    ///
    /// Returns error if required configuration is missing or the broker
    /// cannot be prepared
    pub async fn run_until(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(role = ?self.role, port = self.config.server.port, "daemon running");

        let telegram = TelegramChannel::new(self.config.bot_token()?);
        telegram.connect().await?;
        let sender: Arc<dyn ChatSender> = Arc::new(telegram.clone());

        let requests_topic = self.config.broker.requests_topic.clone();
        let texts_topic = self.config.broker.texts_topic.clone();
        self.broker.ensure_topic(&requests_topic).await?;
        self.broker.ensure_topic(&texts_topic).await?;

        let fetcher = ContentFetcher::new(
            Arc::new(PreviewSource::new(self.config.telegram.preview_url.clone())),
            self.config.pipeline.fetch_limit,
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut api_state = ApiState {
            webhook: None,
            fetcher: Some(fetcher.clone()),
        };

        if self.role.runs_bot() {
            let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
            if let Some(secret) = self.config.telegram.webhook_secret.clone() {
                tracing::info!("Telegram updates arrive by webhook");
                api_state.webhook = Some(WebhookState::new(tx, Some(secret)));
            } else {
                let poller = telegram.start_polling(
                    self.config.telegram.poll_interval,
                    tx,
                    shutdown.clone(),
                );
                tasks.push(poller);
            }

            let controller = Arc::new(ConversationController::new(
                Arc::new(RequestStore::new()),
                Arc::clone(&self.broker),
                Arc::clone(&sender),
                requests_topic.clone(),
            ));
            tasks.push(tokio::spawn(dispatch_messages(
                controller,
                rx,
                self.config.pipeline.handlers,
                shutdown.clone(),
            )));
        }

        if self.role.runs_fetcher() {
            let stage: Arc<dyn StageHandler> = Arc::new(FetchStage::new(
                fetcher,
                Arc::clone(&self.broker),
                Arc::clone(&sender),
                texts_topic.clone(),
            ));
            let subscription = self
                .broker
                .subscribe(&requests_topic, &self.config.broker.group_id)
                .await?;
            tasks.extend(spawn_workers(
                stage,
                Arc::from(subscription),
                self.config.pipeline.workers,
                &shutdown,
            ));
        }

        if self.role.runs_synth() {
            let provider = GoogleTts::from_credentials_file(self.config.credentials_file()?)?;
            let synthesizer = SpeechSynthesizer::new(
                Arc::new(provider),
                self.config.voice.params.clone(),
                self.config.pipeline.synth_concurrency,
            );
            let stage: Arc<dyn StageHandler> =
                Arc::new(SynthStage::new(synthesizer, Arc::clone(&sender)));
            let subscription = self
                .broker
                .subscribe(&texts_topic, &self.config.broker.group_id)
                .await?;
            tasks.extend(spawn_workers(
                stage,
                Arc::from(subscription),
                self.config.pipeline.workers,
                &shutdown,
            ));
        }

        let server = ApiServer::new(Arc::new(api_state), self.config.server.port);
        let api = server.spawn(shutdown.clone());
        tasks.push(tokio::spawn(async move {
            match api.await {
                Ok(Err(e)) => tracing::error!(error = %e, "API server failed"),
                Err(e) => tracing::error!(error = %e, "API server task panicked"),
                Ok(Ok(())) => {}
            }
        }));

        let _ = shutdown.wait_for(|stop| *stop).await;
        drain(tasks, self.config.server.shutdown_timeout).await;

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Fan inbound messages out to the controller, at most `handlers` at a time
async fn dispatch_messages(
    controller: Arc<ConversationController>,
    mut rx: mpsc::Receiver<IncomingMessage>,
    handlers: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(handlers.max(1)));

    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            let _permit = permit;
            tracing::debug!(chat_id = msg.chat_id, sender = %msg.sender_name, "handling message");
            if let Err(e) = controller.handle(msg.chat_id, &msg.text).await {
                tracing::error!(chat_id = msg.chat_id, error = %e, "failed to handle message");
            }
        });
    }

    // Let in-flight handlers finish before reporting done
    let _ = permits.acquire_many(u32::try_from(handlers.max(1)).unwrap_or(u32::MAX)).await;
    tracing::info!("message dispatch stopped");
}

/// Wait up to `grace` for tasks to finish, then abort the rest
async fn drain(tasks: Vec<JoinHandle<()>>, grace: Duration) {
    let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
    let all = futures::future::join_all(tasks);

    if tokio::time::timeout(grace, all).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "tasks still running after grace period, aborting");
        for handle in aborts {
            handle.abort();
        }
    }
}
