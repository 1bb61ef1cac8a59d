use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use glance_logging::{glance_debug, glance_info, glance_trace, glance_warn};
use tokio::sync::mpsc;

use crate::protocol::{SummaryEvent, SummaryMessage};
use crate::sse::{content_delta, SseLineBuffer, SseRecord};
use crate::RequestId;

/// Where and what to ask for a summary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelEndpoint {
    pub provider: String,
    pub base_url: String,
    pub model: String,
}

impl ModelEndpoint {
    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim().trim_end_matches('/'))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    pub markdown: String,
    pub prompt: String,
    pub endpoint: ModelEndpoint,
    pub credential: String,
}

impl SummaryRequest {
    /// Rejects a request that could never reach the provider.
    pub fn validate(&self) -> Result<(), SummaryError> {
        if self.credential.trim().is_empty() {
            return Err(SummaryError::ConfigurationMissing { field: "credential" });
        }
        if self.endpoint.base_url.trim().is_empty() {
            return Err(SummaryError::ConfigurationMissing { field: "base_url" });
        }
        Ok(())
    }
}

impl fmt::Debug for SummaryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryRequest")
            .field("markdown_len", &self.markdown.len())
            .field("prompt_len", &self.prompt.len())
            .field("endpoint", &self.endpoint)
            .field("credential", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub connect_timeout: Duration,
    /// Covers the whole streamed exchange, first byte to last.
    pub deadline: Duration,
    pub probe_timeout: Duration,
    pub max_error_body: usize,
    pub max_detail_chars: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            max_error_body: 4 * 1024,
            max_detail_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummaryError {
    #[error("model configuration is missing {field}")]
    ConfigurationMissing { field: &'static str },
    #[error("provider answered HTTP {status}{}", detail_suffix(.detail))]
    Upstream { status: u16, detail: Option<String> },
    #[error("network error: {0}")]
    Network(String),
    #[error("summary did not finish in time")]
    Timeout,
    #[error("summary cancelled")]
    Aborted,
    #[error("privileged worker is not running")]
    WorkerUnavailable,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|detail| format!(": {detail}"))
        .unwrap_or_default()
}

/// OpenAI-compatible chat client used for streamed summaries and connectivity probes.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    settings: StreamSettings,
}

impl ChatClient {
    pub fn new(settings: StreamSettings) -> Result<Self, SummaryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| SummaryError::Network(err.to_string()))?;
        Ok(Self { http, settings })
    }

    /// Streams one completion into `events`, always finishing with exactly one
    /// `Done` or `Error` unless the receiver has gone away, which aborts the call.
    pub async fn stream_summary(
        &self,
        request_id: RequestId,
        request: &SummaryRequest,
        events: &mpsc::Sender<SummaryMessage>,
    ) {
        let tag = glance_logging::request_field(request_id);
        let terminal = tokio::select! {
            _ = events.closed() => {
                glance_debug!("{tag} summary receiver dropped, aborting upstream call");
                return;
            }
            outcome = tokio::time::timeout(self.settings.deadline, self.pump(request_id, request, events)) => {
                match outcome {
                    Ok(Ok(())) => SummaryEvent::Done,
                    Ok(Err(err)) => SummaryEvent::Error(err),
                    Err(_) => {
                        glance_warn!("{tag} summary exceeded {:?}", self.settings.deadline);
                        SummaryEvent::Error(SummaryError::Timeout)
                    }
                }
            }
        };
        glance_info!("{tag} summary stream finished: {terminal:?}");
        let _ = events
            .send(SummaryMessage {
                request_id,
                event: terminal,
            })
            .await;
    }

    async fn pump(
        &self,
        request_id: RequestId,
        request: &SummaryRequest,
        events: &mpsc::Sender<SummaryMessage>,
    ) -> Result<(), SummaryError> {
        request.validate()?;
        let body = serde_json::json!({
            "model": request.endpoint.model,
            "messages": [
                {"role": "system", "content": request.prompt},
                {"role": "user", "content": request.markdown},
            ],
            "stream": true,
        });

        let response = self
            .http
            .post(request.endpoint.url("chat/completions"))
            .bearer_auth(&request.credential)
            .json(&body)
            .send()
            .await
            .map_err(map_network)?;

        let status = response.status();
        if !status.is_success() {
            let text = read_capped(response, self.settings.max_error_body).await;
            return Err(SummaryError::Upstream {
                status: status.as_u16(),
                detail: error_detail(&text, self.settings.max_detail_chars),
            });
        }

        let mut buffer = SseLineBuffer::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_network)?;
            for record in buffer.push(&chunk) {
                if forward(request_id, record, events).await? {
                    return Ok(());
                }
            }
        }
        if let Some(record) = buffer.finish() {
            forward(request_id, record, events).await?;
        }
        // EOF without the sentinel still completes the exchange.
        Ok(())
    }

    /// `GET {base}/models` with the credential; any 2xx means the provider is reachable.
    pub async fn test_connection(
        &self,
        endpoint: &ModelEndpoint,
        credential: &str,
    ) -> Result<(), SummaryError> {
        if credential.trim().is_empty() {
            return Err(SummaryError::ConfigurationMissing { field: "credential" });
        }
        if endpoint.base_url.trim().is_empty() {
            return Err(SummaryError::ConfigurationMissing { field: "base_url" });
        }
        let response = self
            .http
            .get(endpoint.url("models"))
            .bearer_auth(credential)
            .timeout(self.settings.probe_timeout)
            .send()
            .await
            .map_err(map_network)?;
        let status = response.status();
        if status.is_success() {
            glance_info!("provider {} reachable", endpoint.provider);
            return Ok(());
        }
        let text = read_capped(response, self.settings.max_error_body).await;
        Err(SummaryError::Upstream {
            status: status.as_u16(),
            detail: error_detail(&text, self.settings.max_detail_chars),
        })
    }
}

/// Sends the delta a record carries; returns true once the stream is complete.
async fn forward(
    request_id: RequestId,
    record: SseRecord,
    events: &mpsc::Sender<SummaryMessage>,
) -> Result<bool, SummaryError> {
    let payload = match record {
        SseRecord::Done => return Ok(true),
        SseRecord::Data(payload) => payload,
    };
    match content_delta(&payload) {
        Ok(Some(text)) => events
            .send(SummaryMessage {
                request_id,
                event: SummaryEvent::Chunk(text),
            })
            .await
            .map(|_| false)
            .map_err(|_| SummaryError::Aborted),
        Ok(None) => Ok(false),
        Err(err) => {
            glance_trace!(
                "{} skipping malformed record ({err}): {payload}",
                glance_logging::request_field(request_id)
            );
            Ok(false)
        }
    }
}

async fn read_capped(response: reqwest::Response, cap: usize) -> String {
    let mut collected = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(Ok(chunk)) = stream.next().await {
        let room = cap.saturating_sub(collected.len());
        collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if collected.len() >= cap {
            break;
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

/// Provider detail from an error body: `error.message`, `error`, or `message`,
/// else the raw body cut to `max_chars`.
pub fn error_detail(body: &str, max_chars: usize) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("error").filter(|error| error.is_string()))
            .or_else(|| value.get("message"))
            .and_then(|message| message.as_str());
        if let Some(message) = message {
            return Some(message.to_string());
        }
    }
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let mut detail: String = body.chars().take(max_chars).collect();
    if detail.len() < body.len() {
        detail.push_str("...");
    }
    Some(detail)
}

fn map_network(err: reqwest::Error) -> SummaryError {
    if err.is_timeout() {
        SummaryError::Timeout
    } else {
        SummaryError::Network(err.to_string())
    }
}
