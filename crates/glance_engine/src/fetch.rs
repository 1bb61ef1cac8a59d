use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use glance_logging::{glance_debug, glance_info, glance_warn};
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::base::inject_base_href;
use crate::decode::decode_html;
use crate::worker::WorkerHandle;
use crate::{FailureKind, FetchError, FetchedDocument, RawDocument, RequestId};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    /// Send the session's cookies along, as a logged-in browser tab would.
    pub send_cookies: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(4),
            request_timeout: Duration::from_secs(8),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            send_cookies: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Upper bound on waiting for the privileged worker's reply.
    pub timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Retrieves a page for preview. Implementations honour `cancel` and their own deadline.
#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(
        &self,
        request_id: RequestId,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument, FetchError>;
}

/// Fetches straight from this process.
#[derive(Debug, Clone)]
pub struct DirectFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl DirectFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .cookie_store(settings.send_cookies)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Downloads and decodes the page body without rewriting it.
    pub async fn retrieve(&self, url: &str) -> Result<RawDocument, FetchError> {
        let target = parse_target(url)?;
        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(too_large(self.settings.max_bytes));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::Network,
                    format!("unsupported content type {ct}"),
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            if bytes.len() as u64 + chunk.len() as u64 > self.settings.max_bytes {
                return Err(too_large(self.settings.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        let decoded = decode_html(&bytes, content_type.as_deref());
        if decoded.lossy {
            glance_debug!(
                "{url} decoded as {} with replacement characters",
                decoded.encoding_label
            );
        }

        Ok(RawDocument {
            body: decoded.html,
            final_url,
        })
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for DirectFetcher {
    async fn fetch(
        &self,
        request_id: RequestId,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument, FetchError> {
        glance_debug!("{} direct fetch {url}", glance_logging::request_field(request_id));
        let raw = run_bounded(cancel, self.settings.request_timeout, self.retrieve(url)).await?;
        Ok(finish_document(url, raw))
    }
}

/// Delegates retrieval to the privileged worker, falling back to a direct fetch
/// when the worker is gone.
pub struct ProxyFetcher {
    worker: WorkerHandle,
    fallback: DirectFetcher,
    settings: ProxySettings,
}

impl ProxyFetcher {
    pub fn new(worker: WorkerHandle, fallback: DirectFetcher, settings: ProxySettings) -> Self {
        Self {
            worker,
            fallback,
            settings,
        }
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for ProxyFetcher {
    async fn fetch(
        &self,
        request_id: RequestId,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedDocument, FetchError> {
        parse_target(url)?;
        let Ok(reply) = self.worker.send_fetch(request_id, url) else {
            glance_warn!(
                "{} worker unavailable, fetching directly",
                glance_logging::request_field(request_id)
            );
            return self.fallback.fetch(request_id, url, cancel).await;
        };

        // Dropping `reply` on cancel or timeout tells the worker to abort.
        let delivered = run_bounded(cancel, self.settings.timeout, async { Ok(reply.await) }).await?;
        match delivered {
            Ok(result) => result.map(|raw| finish_document(url, raw)),
            Err(_) => {
                glance_warn!(
                    "{} worker dropped the fetch, fetching directly",
                    glance_logging::request_field(request_id)
                );
                self.fallback.fetch(request_id, url, cancel).await
            }
        }
    }
}

/// Picks the fetch capability once at startup.
pub fn select_fetcher(
    worker: Option<WorkerHandle>,
    fetch: FetchSettings,
    proxy: ProxySettings,
) -> Result<Arc<dyn DocumentFetcher>, FetchError> {
    let direct = DirectFetcher::new(fetch)?;
    Ok(match worker {
        Some(worker) => {
            glance_info!("document fetches go through the privileged worker");
            Arc::new(ProxyFetcher::new(worker, direct, proxy))
        }
        None => {
            glance_info!("document fetches run directly");
            Arc::new(direct)
        }
    })
}

/// Races `work` against cancellation and a deadline. Cancellation wins ties.
pub(crate) async fn run_bounded<T, F>(
    cancel: &CancellationToken,
    deadline: Duration,
    work: F,
) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    if cancel.is_cancelled() {
        return Err(FetchError::aborted());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::aborted()),
        outcome = tokio::time::timeout(deadline, work) => match outcome {
            Ok(result) => result,
            Err(_) => Err(FetchError::new(
                FailureKind::Timeout,
                format!("no response within {:.1}s", deadline.as_secs_f32()),
            )),
        },
    }
}

pub(crate) fn parse_target(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url)
        .map_err(|err| FetchError::new(FailureKind::InvalidUrl, format!("{url}: {err}")))?;
    if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() {
        Ok(parsed)
    } else {
        Err(FetchError::new(
            FailureKind::InvalidUrl,
            format!("cannot fetch {url}"),
        ))
    }
}

fn finish_document(original_url: &str, raw: RawDocument) -> FetchedDocument {
    FetchedDocument {
        html: inject_base_href(&raw.body, Some(&raw.final_url), original_url),
        original_url: original_url.to_string(),
        final_url: raw.final_url,
    }
}

fn too_large(max_bytes: u64) -> FetchError {
    FetchError::new(
        FailureKind::Network,
        format!("response exceeds {max_bytes} bytes"),
    )
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidUrl, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
