use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glance_logging::{glance_debug, glance_info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{SummaryEvent, SummaryMessage};
use crate::upstream::{ChatClient, SummaryError, SummaryRequest};
use crate::RequestId;

pub(crate) const SUMMARY_CHANNEL_CAPACITY: usize = 64;

/// Accumulated text of one streamed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryStreamSession {
    request_id: RequestId,
    accumulated: String,
}

impl SummaryStreamSession {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            accumulated: String::new(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn append(&mut self, chunk: &str) -> &str {
        self.accumulated.push_str(chunk);
        &self.accumulated
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    pub fn into_text(self) -> String {
        self.accumulated
    }
}

/// What the controller hands back to its owner. Only ever delivered for a live request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryUpdate {
    /// `text` is everything received so far.
    Progress { request_id: RequestId, text: String },
    Done { request_id: RequestId, text: String },
    Failed {
        request_id: RequestId,
        error: SummaryError,
    },
}

/// Answers "is this request still the one on screen?" at delivery time.
pub trait ActivityCheck: Send + Sync {
    fn is_active(&self, request_id: RequestId) -> bool;
}

impl<F> ActivityCheck for F
where
    F: Fn(RequestId) -> bool + Send + Sync,
{
    fn is_active(&self, request_id: RequestId) -> bool {
        self(request_id)
    }
}

/// Opens a streamed exchange. Dropping the returned receiver aborts it.
#[async_trait::async_trait]
pub trait SummaryTransport: Send + Sync {
    async fn generate(
        &self,
        request_id: RequestId,
        request: SummaryRequest,
    ) -> Result<mpsc::Receiver<SummaryMessage>, SummaryError>;
}

#[async_trait::async_trait]
impl SummaryTransport for ChatClient {
    async fn generate(
        &self,
        request_id: RequestId,
        request: SummaryRequest,
    ) -> Result<mpsc::Receiver<SummaryMessage>, SummaryError> {
        request.validate()?;
        let (events, rx) = mpsc::channel(SUMMARY_CHANNEL_CAPACITY);
        let client = self.clone();
        tokio::spawn(async move {
            client.stream_summary(request_id, &request, &events).await;
        });
        Ok(rx)
    }
}

#[derive(Debug)]
struct ActiveSession {
    request_id: RequestId,
    cancel: CancellationToken,
}

type SessionSlot = Arc<Mutex<Option<ActiveSession>>>;

/// Runs at most one summary session at a time, discarding output that is no longer wanted.
pub struct SummaryStreamController {
    transport: Arc<dyn SummaryTransport>,
    activity: Arc<dyn ActivityCheck>,
    active: SessionSlot,
}

impl SummaryStreamController {
    pub fn new(transport: Arc<dyn SummaryTransport>, activity: Arc<dyn ActivityCheck>) -> Self {
        Self {
            transport,
            activity,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces any running session. Configuration problems are reported here,
    /// before anything is sent; everything later arrives through `deliver`.
    pub fn start<F>(
        &self,
        request_id: RequestId,
        request: SummaryRequest,
        deliver: F,
    ) -> Result<(), SummaryError>
    where
        F: Fn(SummaryUpdate) + Send + Sync + 'static,
    {
        request.validate()?;
        self.cancel();

        let cancel = CancellationToken::new();
        *lock(&self.active) = Some(ActiveSession {
            request_id,
            cancel: cancel.clone(),
        });
        glance_info!(
            "{} summary session started",
            glance_logging::request_field(request_id)
        );

        tokio::spawn(run_session(
            self.transport.clone(),
            self.activity.clone(),
            SlotGuard {
                slot: self.active.clone(),
                request_id,
            },
            request,
            cancel,
            deliver,
        ));
        Ok(())
    }

    /// Stops the running session, if any. Safe to call repeatedly.
    pub fn cancel(&self) {
        if let Some(session) = lock(&self.active).take() {
            glance_debug!(
                "{} summary session cancelled",
                glance_logging::request_field(session.request_id)
            );
            session.cancel.cancel();
        }
    }

    pub fn active_request(&self) -> Option<RequestId> {
        lock(&self.active).as_ref().map(|session| session.request_id)
    }
}

fn lock(slot: &SessionSlot) -> MutexGuard<'_, Option<ActiveSession>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Vacates the controller's slot when its session ends, unless a newer one took it.
struct SlotGuard {
    slot: SessionSlot,
    request_id: RequestId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.slot);
        if active
            .as_ref()
            .is_some_and(|session| session.request_id == self.request_id)
        {
            *active = None;
        }
    }
}

async fn run_session<F>(
    transport: Arc<dyn SummaryTransport>,
    activity: Arc<dyn ActivityCheck>,
    guard: SlotGuard,
    request: SummaryRequest,
    cancel: CancellationToken,
    deliver: F,
) where
    F: Fn(SummaryUpdate) + Send + Sync + 'static,
{
    let request_id = guard.request_id;
    let tag = glance_logging::request_field(request_id);
    let live = || !cancel.is_cancelled() && activity.is_active(request_id);

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = transport.generate(request_id, request) => opened,
    };
    let mut events = match opened {
        Ok(events) => events,
        Err(error) => {
            if live() {
                deliver(SummaryUpdate::Failed { request_id, error });
            }
            return;
        }
    };

    let mut session = SummaryStreamSession::new(request_id);
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                glance_debug!("{tag} summary stream dropped on cancel");
                return;
            }
            message = events.recv() => message,
        };
        let Some(message) = message else {
            if live() {
                deliver(SummaryUpdate::Failed {
                    request_id,
                    error: SummaryError::Network("stream ended without completion".to_string()),
                });
            }
            return;
        };
        if message.request_id != request_id {
            glance_debug!("{tag} ignoring message tagged req={}", message.request_id);
            continue;
        }
        // Returning drops `events`, which aborts the upstream call.
        if !live() {
            glance_debug!("{tag} superseded, discarding summary stream");
            return;
        }
        match message.event {
            SummaryEvent::Chunk(chunk) => {
                let text = session.append(&chunk).to_string();
                deliver(SummaryUpdate::Progress { request_id, text });
            }
            SummaryEvent::Done => {
                glance_info!("{tag} summary complete");
                deliver(SummaryUpdate::Done {
                    request_id,
                    text: session.into_text(),
                });
                return;
            }
            SummaryEvent::Error(error) => {
                deliver(SummaryUpdate::Failed { request_id, error });
                return;
            }
        }
    }
}
