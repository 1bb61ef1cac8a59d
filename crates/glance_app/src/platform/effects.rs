use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glance_core::{Effect, Failure, FailureKind, ModelConfig, Msg, RequestId, RequestIdentity};
use glance_engine::{
    bound_markdown, BypassRules, DocumentFetcher, ExtractionError, ExtractionPipeline, FetchError,
    ModelEndpoint, SummaryError, SummaryRequest, SummaryStreamController, SummaryTransport,
    SummaryUpdate,
};
use glance_logging::{glance_debug, glance_info, glance_warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::surface::{LoadNotifier, PreviewSurface};

/// Engine capabilities the runner executes effects against, chosen once at startup.
#[derive(Clone)]
pub struct Services {
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub rules: Arc<dyn BypassRules>,
    pub pipeline: ExtractionPipeline,
    pub summaries: Arc<dyn SummaryTransport>,
}

/// Executes core effects and feeds results back as `Msg`s.
///
/// Every result is checked against the request identity right before it is
/// sent, so superseded work finishes quietly.
pub struct EffectRunner {
    services: Services,
    identity: RequestIdentity,
    surface: Arc<dyn PreviewSurface>,
    msg_tx: UnboundedSender<Msg>,
    fetch_slot: StageSlot,
    extract_slot: StageSlot,
    summaries: SummaryStreamController,
}

impl EffectRunner {
    pub fn new(
        services: Services,
        identity: RequestIdentity,
        surface: Arc<dyn PreviewSurface>,
        msg_tx: UnboundedSender<Msg>,
    ) -> Self {
        let activity = identity.clone();
        let summaries = SummaryStreamController::new(
            services.summaries.clone(),
            Arc::new(move |request_id: RequestId| activity.is_active(request_id)),
        );
        Self {
            services,
            identity,
            surface,
            msg_tx,
            fetch_slot: StageSlot::default(),
            extract_slot: StageSlot::default(),
            summaries,
        }
    }

    pub async fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            self.run_one(effect).await;
        }
    }

    async fn run_one(&self, effect: Effect) {
        match effect {
            Effect::CancelActive => {
                self.fetch_slot.cancel();
                self.extract_slot.cancel();
                self.summaries.cancel();
            }
            Effect::FetchDocument { request_id, url } => {
                let guard = self.fetch_slot.acquire(request_id);
                let fetcher = self.services.fetcher.clone();
                let identity = self.identity.clone();
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let result = fetcher.fetch(request_id, &url, guard.token()).await;
                    drop(guard);
                    if !identity.is_active(request_id) {
                        glance_debug!("{} fetch result dropped", glance_logging::request_field(request_id));
                        return;
                    }
                    let msg = match result {
                        Ok(document) => Msg::DocumentFetched {
                            request_id,
                            html: document.html,
                            final_url: document.final_url,
                        },
                        Err(err) => Msg::FetchFailed {
                            request_id,
                            failure: fetch_failure(err),
                        },
                    };
                    let _ = msg_tx.send(msg);
                });
            }
            Effect::AddHeaderBypass { request_id, url } => {
                if let Err(err) = self.services.rules.add_bypass(&url).await {
                    glance_warn!(
                        "{} header bypass for {url} failed: {err}",
                        glance_logging::request_field(request_id)
                    );
                }
            }
            Effect::ShowDocument { request_id, url } => {
                if self.identity.is_active(request_id) {
                    let loaded = LoadNotifier::new(request_id, self.msg_tx.clone());
                    self.surface.load_document(&url, loaded);
                }
            }
            Effect::ExtractContent {
                request_id,
                html,
                url,
            } => {
                let guard = self.extract_slot.acquire(request_id);
                let pipeline = self.services.pipeline.clone();
                let identity = self.identity.clone();
                let msg_tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.extract(&html, &url, guard.token()).await;
                    drop(guard);
                    if !identity.is_active(request_id) {
                        return;
                    }
                    let msg = match result {
                        Ok(markdown) => Msg::ContentExtracted {
                            request_id,
                            markdown,
                        },
                        Err(err) => Msg::ExtractionFailed {
                            request_id,
                            failure: extraction_failure(err),
                        },
                    };
                    let _ = msg_tx.send(msg);
                });
            }
            Effect::StartSummary {
                request_id,
                markdown,
                model,
            } => {
                let request = summary_request(&markdown, model);
                let msg_tx = self.msg_tx.clone();
                let started = self.summaries.start(request_id, request, move |update| {
                    let _ = msg_tx.send(summary_msg(update));
                });
                if let Err(err) = started {
                    let _ = self.msg_tx.send(Msg::SummaryFailed {
                        request_id,
                        failure: summary_failure(err),
                    });
                }
            }
            Effect::ClearHeaderBypass => {
                let removed = self.services.rules.clear_all().await;
                glance_info!("closed preview, {removed} header bypass rules removed");
            }
        }
    }
}

fn summary_request(markdown: &str, model: ModelConfig) -> SummaryRequest {
    SummaryRequest {
        markdown: bound_markdown(markdown),
        prompt: model.prompt,
        endpoint: ModelEndpoint {
            provider: model.provider,
            base_url: model.base_url,
            model: model.model,
        },
        credential: model.credential.unwrap_or_default(),
    }
}

fn summary_msg(update: SummaryUpdate) -> Msg {
    match update {
        SummaryUpdate::Progress { request_id, text } => Msg::SummaryProgress { request_id, text },
        SummaryUpdate::Done { request_id, .. } => Msg::SummaryDone { request_id },
        SummaryUpdate::Failed { request_id, error } => Msg::SummaryFailed {
            request_id,
            failure: summary_failure(error),
        },
    }
}

fn fetch_failure(err: FetchError) -> Failure {
    let kind = match err.kind {
        glance_engine::FailureKind::InvalidUrl => FailureKind::InvalidUrl,
        glance_engine::FailureKind::Network => FailureKind::Network,
        glance_engine::FailureKind::HttpStatus(status) => FailureKind::Http(status),
        glance_engine::FailureKind::Timeout => FailureKind::Timeout,
        glance_engine::FailureKind::Aborted => FailureKind::Aborted,
    };
    Failure::new(kind, err.message)
}

fn extraction_failure(err: ExtractionError) -> Failure {
    let kind = match &err {
        ExtractionError::EmptyDocument => FailureKind::EmptyDocument,
        ExtractionError::NoContent => FailureKind::NoContent,
        ExtractionError::Timeout => FailureKind::Timeout,
        ExtractionError::Aborted => FailureKind::Aborted,
        ExtractionError::ExtractionFailed(_) => FailureKind::Extraction,
    };
    Failure::new(kind, err.to_string())
}

fn summary_failure(err: SummaryError) -> Failure {
    match err {
        SummaryError::ConfigurationMissing { field } => {
            Failure::new(FailureKind::Configuration, format!("{field} is not set"))
        }
        SummaryError::Upstream { status, detail } => Failure::new(
            FailureKind::Upstream(Some(status)),
            detail.unwrap_or_else(|| "no detail".to_string()),
        ),
        // The model endpoint failed, not the page.
        SummaryError::Network(detail) => Failure::new(FailureKind::Upstream(None), detail),
        SummaryError::Timeout => Failure::new(
            FailureKind::Upstream(None),
            "no complete answer within the time limit",
        ),
        SummaryError::Aborted => Failure::aborted(),
        SummaryError::WorkerUnavailable => Failure::new(
            FailureKind::Upstream(None),
            SummaryError::WorkerUnavailable.to_string(),
        ),
    }
}

/// Cancellation scope for one pipeline stage; starting new work cancels the old.
#[derive(Clone, Default)]
struct StageSlot {
    current: Arc<Mutex<Option<(RequestId, CancellationToken)>>>,
}

impl StageSlot {
    fn acquire(&self, request_id: RequestId) -> StageGuard {
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.lock().replace((request_id, token.clone())) {
            previous.cancel();
        }
        StageGuard {
            slot: self.clone(),
            request_id,
            token,
        }
    }

    fn cancel(&self) {
        if let Some((request_id, token)) = self.lock().take() {
            glance_debug!("{} stage cancelled", glance_logging::request_field(request_id));
            token.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<(RequestId, CancellationToken)>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the slot when the stage's work ends.
struct StageGuard {
    slot: StageSlot,
    request_id: RequestId,
    token: CancellationToken,
}

impl StageGuard {
    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mut current = self.slot.lock();
        if current.as_ref().is_some_and(|(id, _)| *id == self.request_id) {
            *current = None;
        }
    }
}
