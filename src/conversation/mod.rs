//! Menu-driven request collection
//!
//! Each chat owns one [`ConversationState`]. Incoming text is applied to it as
//! a pure transition ([`ConversationState::apply`]) under the chat's lock; all
//! I/O (replies, publishing) happens after the lock is released.

pub mod keyboard;
pub mod store;

use std::sync::Arc;

use crate::broker::Broker;
use crate::channels::{ChatSender, Keyboard};
use crate::pipeline::envelope::SubmitEnvelope;
use crate::Result;

pub use store::RequestStore;

/// Window used when none was chosen
pub const DEFAULT_WINDOW_HOURS: u32 = 1;

/// Rate used when none was chosen
pub const DEFAULT_SPEAKING_RATE: f64 = 1.0;

/// Which menu the chat is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Main menu
    #[default]
    MainMenu,
    /// Next free text is the channel name
    AwaitingChannelInput,
    /// Rate keyboard shown
    ChoosingRate,
    /// Window keyboard shown
    ChoosingWindow,
}

/// Parameters collected so far; zero values mean "unset"
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    /// Bare channel username
    pub channel: String,
    /// Lookback window in hours
    pub window_hours: u32,
    /// Speech rate multiplier
    pub speaking_rate: f64,
}

impl Request {
    fn is_unset(&self) -> bool {
        self.channel.is_empty() && self.window_hours == 0 && self.speaking_rate.abs() < f64::EPSILON
    }
}

/// Per-chat conversation state
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    /// Owning chat
    pub chat_id: i64,
    /// Request under construction
    pub request: Request,
    /// Current menu
    pub mode: UiMode,
}

/// A message to send back to the user
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    fn new(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

/// Outcome of applying one message
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Reply and wait for more input
    Reply(Reply),
    /// The request was finalized and must be published
    Submit(SubmitEnvelope),
}

impl ConversationState {
    #[must_use]
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            request: Request::default(),
            mode: UiMode::MainMenu,
        }
    }

    /// Apply one text message
    ///
    /// `now_ms` stamps a submission. On submit the three request fields are
    /// cleared before returning, so a second submit cannot resend them.
    pub fn apply(&mut self, text: &str, now_ms: i64) -> Step {
        let text = text.trim();

        if text == keyboard::START {
            self.request = Request::default();
            self.mode = UiMode::MainMenu;
            return Step::Reply(Reply::new(
                "Добро пожаловать! Выберите действие:",
                keyboard::main_menu(),
            ));
        }

        if let Some(rate) = keyboard::parse_rate(text) {
            self.request.speaking_rate = rate;
            self.mode = UiMode::MainMenu;
            return Step::Reply(Reply::new(
                format!("Скорость сохранена: {text}. Выберите действие:"),
                keyboard::main_menu(),
            ));
        }

        if let Some(window) = keyboard::parse_window(text) {
            self.request.window_hours = window;
            self.mode = UiMode::MainMenu;
            return Step::Reply(Reply::new(
                format!("Период сохранён: {text} ч. Выберите действие:"),
                keyboard::main_menu(),
            ));
        }

        match text {
            keyboard::CHOOSE_CHANNEL => {
                self.mode = UiMode::AwaitingChannelInput;
                Step::Reply(Reply::new(
                    "Введите имя ТГ канала или ссылку на канал",
                    keyboard::back_only(),
                ))
            }
            keyboard::SPEECH_RATE => {
                self.mode = UiMode::ChoosingRate;
                Step::Reply(Reply::new("Выберите скорость речи:", keyboard::rate_menu()))
            }
            keyboard::TIME_WINDOW => {
                self.mode = UiMode::ChoosingWindow;
                Step::Reply(Reply::new("Выберите период:", keyboard::window_menu()))
            }
            keyboard::BACK => {
                self.mode = UiMode::MainMenu;
                Step::Reply(Reply::new(
                    "Вернулись в главное меню. Выберите действие:",
                    keyboard::main_menu(),
                ))
            }
            keyboard::SUBMIT => self.submit(now_ms),
            _ if self.mode == UiMode::AwaitingChannelInput => match normalize_channel(text) {
                Some(channel) => {
                    self.request.channel.clone_from(&channel);
                    self.mode = UiMode::MainMenu;
                    Step::Reply(Reply::new(
                        format!("Канал сохранён: {channel}. Выберите действие:"),
                        keyboard::main_menu(),
                    ))
                }
                None => Step::Reply(Reply::new(
                    "Ошибка: введите имя канала",
                    keyboard::back_only(),
                )),
            },
            _ => Step::Reply(Reply::new("Пожалуйста, выберите действие:", keyboard::main_menu())),
        }
    }

    fn submit(&mut self, now_ms: i64) -> Step {
        if self.request.channel.is_empty() {
            return Step::Reply(Reply::new(
                "Ошибка: не выбран канал. Пожалуйста, выберите канал перед отправкой.",
                keyboard::main_menu(),
            ));
        }

        let request = std::mem::take(&mut self.request);
        self.mode = UiMode::MainMenu;

        Step::Submit(SubmitEnvelope {
            chat_id: self.chat_id,
            channel: request.channel,
            window_hours: if request.window_hours == 0 {
                DEFAULT_WINDOW_HOURS
            } else {
                request.window_hours
            },
            speaking_rate: if request.speaking_rate.abs() < f64::EPSILON {
                DEFAULT_SPEAKING_RATE
            } else {
                request.speaking_rate
            },
            submitted_at: Some(now_ms),
        })
    }

    /// Put a submitted request back after a failed publish
    ///
    /// Only restores when nothing new was entered in the meantime.
    pub fn restore(&mut self, envelope: &SubmitEnvelope) {
        if self.request.is_unset() {
            self.request = Request {
                channel: envelope.channel.clone(),
                window_hours: envelope.window_hours,
                speaking_rate: envelope.speaking_rate,
            };
        }
    }
}

/// Reduce user input to a bare channel username
///
/// Accepts `name`, `@name` and links such as `https://t.me/name`,
/// `t.me/s/name/123` or `telegram.me/name`. Returns `None` when nothing is left.
#[must_use]
pub fn normalize_channel(input: &str) -> Option<String> {
    let input = input.trim();
    let lower = input.to_ascii_lowercase();

    let looks_like_link = ["http://", "https://", "t.me/", "telegram.me/", "www.t.me/"]
        .iter()
        .any(|p| lower.starts_with(p));

    let name = if looks_like_link {
        let with_scheme = if lower.starts_with("http") {
            input.to_string()
        } else {
            format!("https://{input}")
        };
        let url = url::Url::parse(&with_scheme).ok()?;
        let host = url.host_str()?.trim_start_matches("www.");
        if host != "t.me" && host != "telegram.me" {
            return None;
        }
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        match segments.next()? {
            "s" => segments.next()?.to_string(),
            first => first.to_string(),
        }
    } else {
        input.trim_start_matches('@').to_string()
    };

    let name = name.trim().trim_start_matches('@').to_string();
    (!name.is_empty()).then_some(name)
}

/// Drives conversations: applies messages, replies and publishes submissions
pub struct ConversationController {
    store: Arc<RequestStore>,
    broker: Arc<dyn Broker>,
    sender: Arc<dyn ChatSender>,
    requests_topic: String,
}

impl ConversationController {
    #[must_use]
    pub fn new(
        store: Arc<RequestStore>,
        broker: Arc<dyn Broker>,
        sender: Arc<dyn ChatSender>,
        requests_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broker,
            sender,
            requests_topic: requests_topic.into(),
        }
    }

    /// Shared state store
    #[must_use]
    pub fn store(&self) -> &Arc<RequestStore> {
        &self.store
    }

    /// Handle one inbound text message
    ///
    /// # Errors
    ///
    /// Returns error if the reply cannot be delivered. A failed publish is
    /// reported to the user and is not an error.
    pub async fn handle(&self, chat_id: i64, text: &str) -> Result<()> {
        let entry = self.store.entry(chat_id).await;
        let now_ms = chrono::Utc::now().timestamp_millis();

        let step = {
            let mut state = entry.lock().await;
            state.apply(text, now_ms)
        };

        match step {
            Step::Reply(reply) => {
                self.sender
                    .send_text(chat_id, &reply.text, reply.keyboard.as_ref())
                    .await
            }
            Step::Submit(envelope) => self.publish_submission(&entry, envelope).await,
        }
    }

    async fn publish_submission(
        &self,
        entry: &store::ChatEntry,
        envelope: SubmitEnvelope,
    ) -> Result<()> {
        let chat_id = envelope.chat_id;
        let payload = serde_json::to_vec(&envelope)?;

        if let Err(e) = self.broker.publish(&self.requests_topic, payload).await {
            tracing::error!(chat_id, error = %e, "failed to publish request");
            entry.lock().await.restore(&envelope);
            return self
                .sender
                .send_text(chat_id, "Ошибка отправки. Повторите позже.", Some(&keyboard::main_menu()))
                .await;
        }

        tracing::info!(
            chat_id,
            channel = %envelope.channel,
            window_hours = envelope.window_hours,
            speaking_rate = envelope.speaking_rate,
            "request submitted"
        );

        let confirmation = format!(
            "Запрос отправлен в обработку. Канал: {}, Скорость: {:.1}x, Период: {} ч.",
            envelope.channel, envelope.speaking_rate, envelope.window_hours
        );
        self.sender
            .send_text(chat_id, &confirmation, Some(&keyboard::main_menu()))
            .await
    }
}
