use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glance_engine::{
    ModelEndpoint, SummaryError, SummaryEvent, SummaryMessage, SummaryRequest,
    SummaryStreamController, SummaryTransport, SummaryUpdate,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

/// Hands the sending half of every opened stream to the test.
#[derive(Default)]
struct ScriptedTransport {
    opened: Mutex<Vec<mpsc::Sender<SummaryMessage>>>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl SummaryTransport for ScriptedTransport {
    async fn generate(
        &self,
        _request_id: u64,
        _request: SummaryRequest,
    ) -> Result<mpsc::Receiver<SummaryMessage>, SummaryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        self.opened.lock().unwrap().push(tx);
        Ok(rx)
    }
}

impl ScriptedTransport {
    async fn stream(&self, index: usize) -> mpsc::Sender<SummaryMessage> {
        for _ in 0..200 {
            if let Some(tx) = self.opened.lock().unwrap().get(index) {
                return tx.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("stream {index} never opened");
    }
}

struct Harness {
    transport: Arc<ScriptedTransport>,
    current: Arc<AtomicU64>,
    controller: SummaryStreamController,
    updates: mpsc::UnboundedReceiver<SummaryUpdate>,
    deliver_tx: mpsc::UnboundedSender<SummaryUpdate>,
}

impl Harness {
    fn new() -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let current = Arc::new(AtomicU64::new(0));
        let active = current.clone();
        let controller = SummaryStreamController::new(
            transport.clone(),
            Arc::new(move |id: u64| active.load(Ordering::SeqCst) == id),
        );
        let (deliver_tx, updates) = mpsc::unbounded_channel();
        Self {
            transport,
            current,
            controller,
            updates,
            deliver_tx,
        }
    }

    fn start(&self, request_id: u64) -> Result<(), SummaryError> {
        self.current.store(request_id, Ordering::SeqCst);
        let tx = self.deliver_tx.clone();
        self.controller.start(request_id, request("sk-test"), move |update| {
            let _ = tx.send(update);
        })
    }

    async fn next_update(&mut self) -> SummaryUpdate {
        tokio::time::timeout(Duration::from_secs(2), self.updates.recv())
            .await
            .expect("update in time")
            .expect("channel open")
    }

    async fn wait_idle(&self) {
        for _ in 0..200 {
            if self.controller.active_request().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session slot never cleared");
    }

    async fn assert_quiet(&mut self) {
        let idle = tokio::time::timeout(Duration::from_millis(50), self.updates.recv()).await;
        assert!(idle.is_err(), "unexpected update: {idle:?}");
    }
}

fn request(credential: &str) -> SummaryRequest {
    SummaryRequest {
        markdown: "hi".to_string(),
        prompt: "Summarize.".to_string(),
        endpoint: ModelEndpoint {
            provider: "openai".to_string(),
            base_url: "https://api.example.com/v1".to_string(),
            model: "small".to_string(),
        },
        credential: credential.to_string(),
    }
}

fn message(request_id: u64, event: SummaryEvent) -> SummaryMessage {
    SummaryMessage { request_id, event }
}

#[tokio::test]
async fn progress_accumulates_then_completes() {
    let mut harness = Harness::new();
    harness.start(1).expect("started");
    let stream = harness.transport.stream(0).await;

    stream.send(message(1, SummaryEvent::Chunk("He".into()))).await.unwrap();
    stream.send(message(1, SummaryEvent::Chunk("llo".into()))).await.unwrap();
    stream.send(message(1, SummaryEvent::Done)).await.unwrap();

    let mut updates = Vec::new();
    for _ in 0..3 {
        updates.push(harness.next_update().await);
    }
    assert_eq!(
        updates,
        vec![
            SummaryUpdate::Progress {
                request_id: 1,
                text: "He".into()
            },
            SummaryUpdate::Progress {
                request_id: 1,
                text: "Hello".into()
            },
            SummaryUpdate::Done {
                request_id: 1,
                text: "Hello".into()
            },
        ]
    );
    stream.closed().await;
    harness.wait_idle().await;
}

#[tokio::test]
async fn stale_session_output_is_discarded_and_stream_dropped() {
    let mut harness = Harness::new();
    harness.start(1).expect("started");
    let stream = harness.transport.stream(0).await;

    stream.send(message(1, SummaryEvent::Chunk("He".into()))).await.unwrap();
    assert_eq!(
        harness.next_update().await,
        SummaryUpdate::Progress {
            request_id: 1,
            text: "He".into()
        }
    );

    // Another request takes over without this controller hearing about it.
    harness.current.store(2, Ordering::SeqCst);
    let _ = stream.send(message(1, SummaryEvent::Chunk("llo".into()))).await;
    let _ = stream.send(message(1, SummaryEvent::Done)).await;

    tokio::time::timeout(Duration::from_secs(2), stream.closed())
        .await
        .expect("receiver dropped");
    harness.assert_quiet().await;
}

#[tokio::test]
async fn upstream_error_is_delivered_once() {
    let mut harness = Harness::new();
    harness.start(4).expect("started");
    let stream = harness.transport.stream(0).await;
    let error = SummaryError::Upstream {
        status: 500,
        detail: None,
    };
    stream.send(message(4, SummaryEvent::Error(error.clone()))).await.unwrap();
    let _ = stream.send(message(4, SummaryEvent::Done)).await;

    assert_eq!(
        harness.next_update().await,
        SummaryUpdate::Failed {
            request_id: 4,
            error
        }
    );
    harness.assert_quiet().await;
}

#[tokio::test]
async fn restarting_cancels_the_previous_session() {
    let mut harness = Harness::new();
    harness.start(1).expect("started");
    let first = harness.transport.stream(0).await;
    harness.start(2).expect("started");
    let second = harness.transport.stream(1).await;

    tokio::time::timeout(Duration::from_secs(2), first.closed())
        .await
        .expect("first stream dropped");
    assert_eq!(harness.controller.active_request(), Some(2));

    second.send(message(2, SummaryEvent::Chunk("B".into()))).await.unwrap();
    assert_eq!(
        harness.next_update().await,
        SummaryUpdate::Progress {
            request_id: 2,
            text: "B".into()
        }
    );
}

#[tokio::test]
async fn cancel_is_silent_and_repeatable() {
    let mut harness = Harness::new();
    harness.start(1).expect("started");
    let stream = harness.transport.stream(0).await;

    harness.controller.cancel();
    harness.controller.cancel();
    tokio::time::timeout(Duration::from_secs(2), stream.closed())
        .await
        .expect("stream dropped");
    assert_eq!(harness.controller.active_request(), None);
    harness.assert_quiet().await;
}

#[tokio::test]
async fn missing_credential_is_rejected_before_transport() {
    let harness = Harness::new();
    let err = harness
        .controller
        .start(1, request(""), |_| {})
        .unwrap_err();
    assert_eq!(err, SummaryError::ConfigurationMissing { field: "credential" });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.transport.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.controller.active_request(), None);
}
