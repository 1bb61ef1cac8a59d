use std::sync::Arc;

use glance_engine::{
    spawn_worker, BypassRules, ModelEndpoint, ResourceType, SessionRuleTable, SummaryError,
    SummaryEvent, SummaryRequest, SummaryTransport, WorkerSettings,
};
use pretty_assertions::assert_eq;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(base_url: &str) -> ModelEndpoint {
    ModelEndpoint {
        provider: "openai".to_string(),
        base_url: base_url.to_string(),
        model: "small".to_string(),
    }
}

#[tokio::test]
async fn rules_are_managed_through_the_worker() {
    let table = Arc::new(SessionRuleTable::new());
    let worker = spawn_worker(WorkerSettings::default(), table.clone()).expect("worker");

    assert_eq!(worker.add_bypass("https://example.com/a").await, Ok(1));
    assert_eq!(worker.add_bypass("https://cdn.example.com/b").await, Ok(2));

    let mut headers = HeaderMap::new();
    headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
    assert_eq!(
        table.rewrite_headers("https://cdn.example.com/", ResourceType::SubFrame, &mut headers),
        1
    );

    assert_eq!(worker.clear_all().await, 2);
    assert_eq!(worker.clear_all().await, 0);
    assert!(table.is_empty());
    worker.shutdown();
}

#[tokio::test]
async fn summary_streams_through_the_worker() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [{"delta": {"content": "Hello"}}]})
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let worker = spawn_worker(WorkerSettings::default(), Arc::new(SessionRuleTable::new()))
        .expect("worker");
    let request = SummaryRequest {
        markdown: "hi".into(),
        prompt: "Summarize.".into(),
        endpoint: endpoint(&server.uri()),
        credential: "sk-test".into(),
    };
    let mut events = worker.generate(3, request).await.expect("accepted");

    let mut received = Vec::new();
    while let Some(message) = events.recv().await {
        received.push(message.event);
    }
    assert_eq!(
        received,
        vec![SummaryEvent::Chunk("Hello".into()), SummaryEvent::Done]
    );
    worker.shutdown();
}

#[tokio::test]
async fn connection_probe_reports_success_and_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer bad"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
        )
        .mount(&server)
        .await;

    let worker = spawn_worker(WorkerSettings::default(), Arc::new(SessionRuleTable::new()))
        .expect("worker");
    let base = format!("{}/v1", server.uri());

    assert_eq!(worker.test_connection(endpoint(&base), "good".into()).await, Ok(()));
    assert_eq!(
        worker.test_connection(endpoint(&base), "bad".into()).await,
        Err(SummaryError::Upstream {
            status: 401,
            detail: Some("bad key".into()),
        })
    );
    assert_eq!(
        worker.test_connection(endpoint(&base), "".into()).await,
        Err(SummaryError::ConfigurationMissing { field: "credential" })
    );
    worker.shutdown();
}

#[tokio::test]
async fn requests_after_shutdown_report_unavailable() {
    let worker = spawn_worker(WorkerSettings::default(), Arc::new(SessionRuleTable::new()))
        .expect("worker");
    worker.shutdown();
    for _ in 0..100 {
        if !worker.is_running() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(
        worker.test_connection(endpoint("https://api.example.com"), "k".into()).await,
        Err(SummaryError::WorkerUnavailable)
    );
    assert_eq!(worker.clear_all().await, 0);
}

#[tokio::test]
async fn failed_startup_inside_a_runtime_is_an_error_not_a_panic() {
    let settings = WorkerSettings {
        runtime_threads: 0,
        ..WorkerSettings::default()
    };
    let err = spawn_worker(settings, Arc::new(SessionRuleTable::new()))
        .expect_err("zero runtime threads must be refused");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

    // A normal start from the same context still works.
    let worker = spawn_worker(WorkerSettings::default(), Arc::new(SessionRuleTable::new()))
        .expect("worker");
    assert!(worker.is_running());
    worker.shutdown();
}
