//! End-to-end pipeline tests over the in-process broker

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use talkfeed::broker::{Broker, MemoryBroker};
use talkfeed::conversation::keyboard;
use talkfeed::conversation::{ConversationController, RequestStore};
use talkfeed::fetcher::ContentFetcher;
use talkfeed::pipeline::{
    AUDIO_FILENAME, FetchStage, StageHandler, SubmitEnvelope, SynthStage, TextsEnvelope, messages,
    spawn_workers,
};
use talkfeed::voice::{SpeechSynthesizer, VoiceParams};

mod common;
use common::{FakeTts, RecordingSender, Sent, StaticSource, recent_posts, silent_mp3};

const REQUESTS: &str = "requests";
const TEXTS: &str = "texts";
const GROUP: &str = "talkfeed";

struct Harness {
    broker: MemoryBroker,
    sender: Arc<RecordingSender>,
    tts: Arc<FakeTts>,
    controller: ConversationController,
    shutdown: watch::Sender<bool>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl Harness {
    async fn start(source: StaticSource, tts: FakeTts, sender: RecordingSender) -> Self {
        let broker = MemoryBroker::new();
        broker.ensure_topic(REQUESTS).await.unwrap();
        broker.ensure_topic(TEXTS).await.unwrap();
        let shared: Arc<dyn Broker> = Arc::new(broker.clone());
        let sender = Arc::new(sender);
        let tts = Arc::new(tts);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let fetch: Arc<dyn StageHandler> = Arc::new(FetchStage::new(
            ContentFetcher::new(Arc::new(source), 100),
            Arc::clone(&shared),
            sender.clone(),
            TEXTS,
        ));
        let synth: Arc<dyn StageHandler> = Arc::new(SynthStage::new(
            SpeechSynthesizer::new(tts.clone(), VoiceParams::default(), 2),
            sender.clone(),
        ));

        let mut workers = spawn_workers(
            fetch,
            Arc::from(shared.subscribe(REQUESTS, GROUP).await.unwrap()),
            2,
            &shutdown_rx,
        );
        workers.extend(spawn_workers(
            synth,
            Arc::from(shared.subscribe(TEXTS, GROUP).await.unwrap()),
            2,
            &shutdown_rx,
        ));

        let controller = ConversationController::new(
            Arc::new(RequestStore::new()),
            shared,
            sender.clone(),
            REQUESTS,
        );

        Self {
            broker,
            sender,
            tts,
            controller,
            shutdown,
            workers,
        }
    }

    async fn submit(&self, chat_id: i64, channel: &str, rate: &str, window: &str) {
        for input in [keyboard::CHOOSE_CHANNEL, channel, rate, window, keyboard::SUBMIT] {
            self.controller.handle(chat_id, input).await.unwrap();
        }
    }

    async fn stage_output(&self, expected: usize) -> Vec<Sent> {
        self.sender.wait_for_stage_output(expected).await
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        for w in self.workers {
            tokio::time::timeout(Duration::from_secs(2), w)
                .await
                .expect("worker did not stop")
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_submit_to_audio() {
    let source = StaticSource::default().with_channel(
        "newsdaily",
        recent_posts(&[
            ("Третья новость дня.", 5),
            ("Вторая новость: подробности", 20),
            ("Первая новость!", 40),
            ("Старая новость", 200),
        ]),
    );
    let h = Harness::start(source, FakeTts::default(), RecordingSender::default()).await;

    h.submit(11, "@newsdaily", "1.5", "1").await;
    let out = h.stage_output(1).await;

    let Sent::Audio {
        chat_id,
        audio,
        filename,
        caption,
    } = &out[0]
    else {
        panic!("expected audio, got {out:?}");
    };
    assert_eq!(*chat_id, 11);
    assert_eq!(filename, AUDIO_FILENAME);
    assert_eq!(caption.as_deref(), Some("@newsdaily, последние 1 ч."));

    // Oldest first, one unit per post in the window
    let calls = h.tts.calls.lock().await.clone();
    let spoken: Vec<&str> = calls.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(spoken, vec!["Первая новость!", "Вторая новость: подробности", "Третья новость дня."]);
    assert!(calls.iter().all(|(_, rate)| (*rate - 1.5).abs() < f64::EPSILON));

    let expected: Vec<u8> = spoken
        .iter()
        .flat_map(|t| silent_mp3(t.len().to_le_bytes()[0], 3))
        .collect();
    assert_eq!(audio, &expected);

    // Both hops committed
    assert_eq!(h.broker.committed(REQUESTS, GROUP), Some(0));
    assert_eq!(h.broker.committed(TEXTS, GROUP), Some(0));
    h.stop().await;
}

#[tokio::test]
async fn test_channel_not_found() {
    let h = Harness::start(StaticSource::default(), FakeTts::default(), RecordingSender::default()).await;

    h.submit(3, "no_such_channel", "1.0", "2").await;
    let out = h.stage_output(1).await;

    assert_eq!(out[0].text(), Some(messages::channel_not_found("no_such_channel").as_str()));
    assert!(h.broker.messages(TEXTS).is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_fetch_failure() {
    let source = StaticSource::default().with_broken("flaky_news");
    let h = Harness::start(source, FakeTts::default(), RecordingSender::default()).await;

    h.submit(3, "flaky_news", "1.0", "1").await;
    let out = h.stage_output(1).await;

    assert_eq!(out[0].text(), Some(messages::FETCH_FAILED));
    assert!(h.broker.messages(TEXTS).is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_empty_window() {
    let source = StaticSource::default()
        .with_channel("quiet_news", recent_posts(&[("Давно", 600)]))
        .with_channel("latin_news", recent_posts(&[("Only english here 123", 5)]));
    let h = Harness::start(source, FakeTts::default(), RecordingSender::default()).await;

    h.submit(4, "quiet_news", "1.0", "2").await;
    let out = h.stage_output(1).await;
    assert_eq!(out[0].text(), Some(messages::nothing_new("quiet_news", 2).as_str()));

    // Posts exist but nothing survives normalization
    h.submit(4, "latin_news", "1.0", "1").await;
    let out = h.stage_output(2).await;
    assert_eq!(out[1].text(), Some(messages::nothing_new("latin_news", 1).as_str()));

    assert!(h.broker.messages(TEXTS).is_empty());
    assert!(h.tts.calls.lock().await.is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_synthesis_failure_sends_one_message() {
    let source = StaticSource::default().with_channel(
        "newsdaily",
        recent_posts(&[("Хорошо", 5), ("Сбой", 10), ("Тоже хорошо", 15)]),
    );
    let h = Harness::start(source, FakeTts::failing_on("Сбой"), RecordingSender::default()).await;

    h.submit(8, "newsdaily", "1.0", "1").await;
    let out = h.stage_output(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(out[0].text(), Some(messages::SYNTH_FAILED));
    assert_eq!(h.sender.sent().await.len(), 5 + 1);
    h.stop().await;
}

#[tokio::test]
async fn test_delivery_failure_apologizes() {
    let source = StaticSource::default().with_channel("newsdaily", recent_posts(&[("Новость", 5)]));
    let h = Harness::start(source, FakeTts::default(), RecordingSender::failing_audio()).await;

    h.submit(8, "newsdaily", "1.0", "1").await;
    let out = h.stage_output(1).await;

    assert_eq!(out[0].text(), Some(messages::DELIVERY_FAILED));
    h.stop().await;
}

#[tokio::test]
async fn test_duplicate_envelope_processed_once() {
    let source = StaticSource::default().with_channel("newsdaily", recent_posts(&[("Новость", 5)]));
    let h = Harness::start(source, FakeTts::default(), RecordingSender::default()).await;

    let envelope = SubmitEnvelope {
        chat_id: 21,
        channel: "newsdaily".to_string(),
        window_hours: 1,
        speaking_rate: 1.0,
        submitted_at: Some(1_700_000_000_000),
    };
    let payload = serde_json::to_vec(&envelope).unwrap();
    h.broker.publish(REQUESTS, payload.clone()).await.unwrap();
    h.broker.publish(REQUESTS, payload).await.unwrap();

    h.sender.wait_for(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.broker.messages(TEXTS).len(), 1);
    assert_eq!(h.sender.sent().await.len(), 1);
    assert_eq!(h.broker.committed(REQUESTS, GROUP), Some(1));
    h.stop().await;
}

#[tokio::test]
async fn test_malformed_and_invalid_envelopes() {
    let h = Harness::start(StaticSource::default(), FakeTts::default(), RecordingSender::default()).await;

    // Not JSON: dropped without a chat to notify
    h.broker.publish(REQUESTS, b"{not json".to_vec()).await.unwrap();

    // Parses but out of range: the chat is told
    let invalid = SubmitEnvelope {
        chat_id: 30,
        channel: "newsdaily".to_string(),
        window_hours: 0,
        speaking_rate: 1.0,
        submitted_at: None,
    };
    h.broker
        .publish(REQUESTS, serde_json::to_vec(&invalid).unwrap())
        .await
        .unwrap();

    let out = h.sender.wait_for(1).await;
    assert_eq!(out[0].text(), Some(messages::INVALID_REQUEST));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.broker.committed(REQUESTS, GROUP), Some(1));
    h.stop().await;
}

#[tokio::test]
async fn test_synth_stage_keeps_key_order() {
    let h = Harness::start(StaticSource::default(), FakeTts::default(), RecordingSender::default()).await;

    let texts = TextsEnvelope {
        chat_id: 44,
        texts: BTreeMap::from([
            (1_700_000_300, "три".to_string()),
            (1_700_000_100, "раз".to_string()),
            (1_700_000_200, "два два".to_string()),
        ]),
        speaking_rate: 0.75,
        channel: None,
        window_hours: None,
        submitted_at: None,
    };
    h.broker
        .publish(TEXTS, serde_json::to_vec(&texts).unwrap())
        .await
        .unwrap();

    let out = h.sender.wait_for(1).await;
    let Sent::Audio { audio, caption, .. } = &out[0] else {
        panic!("expected audio");
    };
    assert!(caption.is_none());

    let expected: Vec<u8> = ["раз", "два два", "три"]
        .iter()
        .flat_map(|t| silent_mp3(t.len().to_le_bytes()[0], 3))
        .collect();
    assert_eq!(audio, &expected);
    h.stop().await;
}

#[tokio::test]
async fn test_oversized_window_is_rejected_with_one_message() {
    let source = StaticSource::default().with_channel("newsdaily", recent_posts(&[("Новость", 5)]));
    let h = Harness::start(source, FakeTts::default(), RecordingSender::default()).await;

    let raw = br#"{"chatID":7,"channel":"newsdaily","windowHours":4294967295,"speakingRate":1.0,"submittedAt":1}"#;
    h.broker.publish(REQUESTS, raw.to_vec()).await.unwrap();

    let out = h.sender.wait_for(1).await;
    assert_eq!(out[0].text(), Some(messages::INVALID_REQUEST));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.sender.sent().await.len(), 1);
    assert_eq!(h.broker.committed(REQUESTS, GROUP), Some(0));
    assert!(h.broker.messages(TEXTS).is_empty());
    h.stop().await;
}
