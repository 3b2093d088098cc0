//! Conversation controller integration tests

use std::sync::Arc;

use talkfeed::broker::{Broker, MemoryBroker};
use talkfeed::conversation::keyboard::{self, main_menu};
use talkfeed::conversation::{ConversationController, RequestStore};
use talkfeed::pipeline::SubmitEnvelope;

mod common;
use common::{RecordingSender, Sent};

const TOPIC: &str = "requests";

async fn controller() -> (ConversationController, MemoryBroker, Arc<RecordingSender>) {
    let broker = MemoryBroker::new();
    broker.ensure_topic(TOPIC).await.unwrap();
    let sender = Arc::new(RecordingSender::default());
    let controller = ConversationController::new(
        Arc::new(RequestStore::new()),
        Arc::new(broker.clone()),
        sender.clone(),
        TOPIC,
    );
    (controller, broker, sender)
}

async fn say(controller: &ConversationController, chat_id: i64, inputs: &[&str]) {
    for input in inputs {
        controller.handle(chat_id, input).await.unwrap();
    }
}

#[tokio::test]
async fn test_submit_publishes_envelope() {
    let (controller, broker, sender) = controller().await;

    say(
        &controller,
        7,
        &["/start", keyboard::CHOOSE_CHANNEL, "https://t.me/s/newsdaily", "1.5", "3", keyboard::SUBMIT],
    )
    .await;

    let published = broker.messages(TOPIC);
    assert_eq!(published.len(), 1);

    let raw: serde_json::Value = serde_json::from_slice(&published[0]).unwrap();
    assert_eq!(raw["chatID"], 7);
    assert_eq!(raw["channel"], "newsdaily");
    assert_eq!(raw["windowHours"], 3);
    assert_eq!(raw["speakingRate"], 1.5);
    assert!(raw["submittedAt"].is_i64());

    let texts = sender.texts().await;
    assert_eq!(
        texts.last().unwrap(),
        "Запрос отправлен в обработку. Канал: newsdaily, Скорость: 1.5x, Период: 3 ч."
    );
    let Sent::Text { keyboard, .. } = sender.sent().await.pop().unwrap() else {
        panic!("expected text");
    };
    assert_eq!(keyboard, Some(main_menu()));
}

#[tokio::test]
async fn test_defaults_fill_unset_fields() {
    let (controller, broker, _) = controller().await;
    say(&controller, 1, &[keyboard::CHOOSE_CHANNEL, "@newsdaily", keyboard::SUBMIT]).await;

    let env: SubmitEnvelope = serde_json::from_slice(&broker.messages(TOPIC)[0]).unwrap();
    assert_eq!(env.window_hours, 1);
    assert!((env.speaking_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_submit_without_channel_publishes_nothing() {
    let (controller, broker, sender) = controller().await;
    say(&controller, 1, &["2.0", keyboard::SUBMIT]).await;

    assert!(broker.messages(TOPIC).is_empty());
    assert!(sender.texts().await.last().unwrap().starts_with("Ошибка: не выбран канал"));
}

#[tokio::test]
async fn test_publish_failure_restores_request() {
    let (controller, broker, sender) = controller().await;

    broker.fail_publishes(true);
    say(&controller, 5, &[keyboard::CHOOSE_CHANNEL, "newsdaily", "0.75", "6", keyboard::SUBMIT]).await;
    assert!(broker.messages(TOPIC).is_empty());
    assert_eq!(sender.texts().await.last().unwrap(), "Ошибка отправки. Повторите позже.");

    // Fields survived; a plain resubmit goes through with the same values
    broker.fail_publishes(false);
    say(&controller, 5, &[keyboard::SUBMIT]).await;

    let env: SubmitEnvelope = serde_json::from_slice(&broker.messages(TOPIC)[0]).unwrap();
    assert_eq!(env.channel, "newsdaily");
    assert_eq!(env.window_hours, 6);
    assert!((env.speaking_rate - 0.75).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_chats_are_independent() {
    let (controller, broker, _) = controller().await;

    say(&controller, 1, &[keyboard::CHOOSE_CHANNEL, "alpha_news"]).await;
    say(&controller, 2, &[keyboard::CHOOSE_CHANNEL, "beta_news", "2"]).await;
    say(&controller, 1, &[keyboard::SUBMIT]).await;
    say(&controller, 2, &[keyboard::SUBMIT]).await;

    let envs: Vec<SubmitEnvelope> = broker
        .messages(TOPIC)
        .iter()
        .map(|m| serde_json::from_slice(m).unwrap())
        .collect();
    assert_eq!(envs.len(), 2);
    assert_eq!((envs[0].chat_id, envs[0].channel.as_str(), envs[0].window_hours), (1, "alpha_news", 1));
    assert_eq!((envs[1].chat_id, envs[1].channel.as_str(), envs[1].window_hours), (2, "beta_news", 2));
    assert_eq!(controller.store().len().await, 2);
}

#[tokio::test]
async fn test_concurrent_messages_same_chat() {
    let (controller, broker, sender) = controller().await;
    let controller = Arc::new(controller);

    say(&controller, 9, &[keyboard::CHOOSE_CHANNEL, "newsdaily"]).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let c = Arc::clone(&controller);
        handles.push(tokio::spawn(async move { c.handle(9, keyboard::SUBMIT).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    // Only one submit sees a channel; the rest are told to pick one
    assert_eq!(broker.messages(TOPIC).len(), 1);
    let errors = sender
        .texts()
        .await
        .iter()
        .filter(|t| t.starts_with("Ошибка: не выбран канал"))
        .count();
    assert_eq!(errors, 9);
}
