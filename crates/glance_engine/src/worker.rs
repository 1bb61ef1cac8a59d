use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;

use glance_logging::{glance_debug, glance_info};
use tokio::sync::{mpsc, oneshot};

use crate::fetch::{DirectFetcher, FetchSettings};
use crate::protocol::{FetchReply, SummaryMessage, WorkerGone, WorkerRequest};
use crate::rules::{BypassRules, HeaderRuleManager, RuleError, RuleId, SessionRules};
use crate::summary::{SummaryTransport, SUMMARY_CHANNEL_CAPACITY};
use crate::upstream::{ChatClient, ModelEndpoint, StreamSettings, SummaryError, SummaryRequest};
use crate::RequestId;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub fetch: FetchSettings,
    pub stream: StreamSettings,
    /// Threads of the worker's own runtime; must be at least one.
    pub runtime_threads: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            fetch: FetchSettings::default(),
            stream: StreamSettings::default(),
            runtime_threads: 2,
        }
    }
}

/// Cheap, cloneable address of the privileged worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerRequest>,
}

struct WorkerContext {
    fetcher: DirectFetcher,
    rules: HeaderRuleManager,
    chat: ChatClient,
}

/// Starts the worker on its own thread with its own runtime. Requests are handled
/// concurrently; the thread exits on `Shutdown` or when every handle is dropped.
///
/// The runtime is created and dropped on the worker thread only, so this may be
/// called from inside another runtime and still fail cleanly.
pub fn spawn_worker(
    settings: WorkerSettings,
    rules_backend: Arc<dyn SessionRules>,
) -> io::Result<WorkerHandle> {
    let context = Arc::new(WorkerContext {
        fetcher: DirectFetcher::new(settings.fetch).map_err(io::Error::other)?,
        rules: HeaderRuleManager::new(rules_backend),
        chat: ChatClient::new(settings.stream).map_err(io::Error::other)?,
    });
    let threads = settings.runtime_threads;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<io::Result<()>>(1);
    thread::Builder::new()
        .name("glance-worker".to_string())
        .spawn(move || {
            let runtime = match build_runtime(threads) {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            glance_info!("privileged worker started");
            while let Some(request) = rx.blocking_recv() {
                if matches!(request, WorkerRequest::Shutdown) {
                    break;
                }
                let context = context.clone();
                runtime.spawn(async move {
                    context.handle(request).await;
                });
            }
            // Close first so senders see the worker as gone before in-flight work is dropped.
            rx.close();
            drop(rx);
            runtime.shutdown_background();
            glance_info!("privileged worker stopped");
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(WorkerHandle { tx }),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(io::Error::other("worker thread exited during startup")),
    }
}

fn build_runtime(threads: usize) -> io::Result<tokio::runtime::Runtime> {
    if threads == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "worker runtime needs at least one thread",
        ));
    }
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("glance-worker-rt")
        .enable_all()
        .build()
}

impl WorkerContext {
    async fn handle(&self, request: WorkerRequest) {
        match request {
            WorkerRequest::FetchDocument {
                request_id,
                url,
                mut reply,
            } => {
                let outcome = tokio::select! {
                    _ = reply.closed() => None,
                    result = self.fetcher.retrieve(&url) => Some(result),
                };
                match outcome {
                    Some(result) => {
                        let _ = reply.send(result);
                    }
                    None => glance_debug!(
                        "{} requester went away, fetch of {url} aborted",
                        glance_logging::request_field(request_id)
                    ),
                }
            }
            WorkerRequest::AddCspBypass { url, reply } => {
                let _ = reply.send(self.rules.install_bypass(&url));
            }
            WorkerRequest::ClearCspBypass { reply } => {
                let _ = reply.send(self.rules.remove_all());
            }
            WorkerRequest::GenerateSummary {
                request_id,
                request,
                events,
                ack,
            } => {
                if let Err(err) = request.validate() {
                    let _ = ack.send(Err(err));
                    return;
                }
                if ack.send(Ok(())).is_err() {
                    return;
                }
                self.chat.stream_summary(request_id, &request, &events).await;
            }
            WorkerRequest::TestConnection {
                endpoint,
                credential,
                reply,
            } => {
                let _ = reply.send(self.chat.test_connection(&endpoint, &credential).await);
            }
            WorkerRequest::Shutdown => {}
        }
    }
}

impl WorkerHandle {
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_fetch(&self, request_id: RequestId, url: &str) -> Result<FetchReply, WorkerGone> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerRequest::FetchDocument {
            request_id,
            url: url.to_string(),
            reply,
        })?;
        Ok(rx)
    }

    pub async fn test_connection(
        &self,
        endpoint: ModelEndpoint,
        credential: String,
    ) -> Result<(), SummaryError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerRequest::TestConnection {
            endpoint,
            credential,
            reply,
        })
        .map_err(|_| SummaryError::WorkerUnavailable)?;
        rx.await.map_err(|_| SummaryError::WorkerUnavailable)?
    }

    pub fn shutdown(&self) {
        let _ = self.send(WorkerRequest::Shutdown);
    }

    fn send(&self, request: WorkerRequest) -> Result<(), WorkerGone> {
        self.tx.send(request).map_err(|_| WorkerGone)
    }
}

#[async_trait::async_trait]
impl BypassRules for WorkerHandle {
    async fn add_bypass(&self, url: &str) -> Result<RuleId, RuleError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkerRequest::AddCspBypass {
            url: url.to_string(),
            reply,
        })
        .map_err(|_| RuleError::Unavailable)?;
        rx.await.map_err(|_| RuleError::Unavailable)?
    }

    async fn clear_all(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.send(WorkerRequest::ClearCspBypass { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl SummaryTransport for WorkerHandle {
    async fn generate(
        &self,
        request_id: RequestId,
        request: SummaryRequest,
    ) -> Result<mpsc::Receiver<SummaryMessage>, SummaryError> {
        request.validate()?;
        let (events, rx) = mpsc::channel(SUMMARY_CHANNEL_CAPACITY);
        let (ack, ack_rx) = oneshot::channel();
        self.send(WorkerRequest::GenerateSummary {
            request_id,
            request,
            events,
            ack,
        })
        .map_err(|_| SummaryError::WorkerUnavailable)?;
        ack_rx.await.map_err(|_| SummaryError::WorkerUnavailable)??;
        Ok(rx)
    }
}
