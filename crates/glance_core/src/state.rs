use glance_logging::{glance_debug, glance_info};

use crate::view_model::{ErrorView, PreviewViewModel};
use crate::{Failure, ModelConfig, RequestId, RequestIdentity, DEFAULT_SEARCH_TEMPLATE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewStage {
    #[default]
    Idle,
    Fetching,
    Rendering,
    Extracting,
    Summarizing,
    Ready,
    Error,
    Blocked,
    Cancelled,
}

impl PreviewStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PreviewStage::Ready | PreviewStage::Error | PreviewStage::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRequest {
    pub id: RequestId,
    pub url: String,
    pub stage: PreviewStage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchedDocument {
    pub(crate) html: String,
    pub(crate) final_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppState {
    identity: RequestIdentity,
    model: ModelConfig,
    search_template: String,
    request: Option<PreviewRequest>,
    document: Option<FetchedDocument>,
    document_url: Option<String>,
    summary: String,
    failure: Option<Failure>,
    dirty: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            search_template: DEFAULT_SEARCH_TEMPLATE.to_string(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_search_template(mut self, template: impl Into<String>) -> Self {
        self.search_template = template.into();
        self
    }

    /// Shared handle to the identity authority; stage tasks use it for staleness checks.
    pub fn identity(&self) -> RequestIdentity {
        self.identity.clone()
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn request(&self) -> Option<&PreviewRequest> {
        self.request.as_ref()
    }

    pub fn stage(&self) -> PreviewStage {
        self.request
            .as_ref()
            .map_or(PreviewStage::Idle, |request| request.stage)
    }

    pub fn view(&self) -> PreviewViewModel {
        let request = self.request.as_ref();
        let stage = self.stage();
        PreviewViewModel {
            request_id: request.map(|r| r.id),
            stage,
            url: request.map(|r| r.url.clone()),
            document_url: self.document_url.clone(),
            summary: self.summary.clone(),
            error: self.failure.as_ref().map(|failure| ErrorView {
                message: failure.user_message(),
                open_url: request.map(|r| r.url.clone()),
            }),
            show_config_prompt: stage == PreviewStage::Blocked,
            model_ready: self.model.is_ready(),
            dirty: self.dirty,
        }
    }

    /// Returns whether a re-render is pending and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn search_template(&self) -> &str {
        &self.search_template
    }

    pub(crate) fn set_model(&mut self, model: ModelConfig) {
        self.model = model;
        self.mark_dirty();
    }

    /// Allocates a fresh request, cancelling whatever was in flight.
    pub(crate) fn begin_request(&mut self, url: String) -> RequestId {
        self.cancel_current("superseded");
        let id = self.identity.allocate();
        glance_info!("{} stage=fetching url={}", glance_logging::request_field(id), url);
        self.request = Some(PreviewRequest {
            id,
            url,
            stage: PreviewStage::Fetching,
        });
        self.clear_outputs();
        self.mark_dirty();
        id
    }

    /// Returns to idle. Every outstanding id becomes stale.
    pub(crate) fn close(&mut self) -> bool {
        let had_request = self.request.is_some();
        self.cancel_current("closed");
        self.identity.retire();
        self.request = None;
        self.clear_outputs();
        if had_request {
            self.mark_dirty();
        }
        had_request
    }

    /// True when `id` is the active request and currently sits in `stage`.
    pub(crate) fn accepts(&self, id: RequestId, stage: PreviewStage) -> bool {
        if !self.identity.is_active(id) {
            glance_debug!("{} discarded: no longer active", glance_logging::request_field(id));
            return false;
        }
        match self.request.as_ref() {
            Some(request) if request.id == id && request.stage == stage => true,
            Some(request) => {
                glance_debug!(
                    "{} discarded: expected stage {:?}, at {:?}",
                    glance_logging::request_field(id),
                    stage,
                    request.stage
                );
                false
            }
            None => false,
        }
    }

    pub(crate) fn set_stage(&mut self, stage: PreviewStage) {
        if let Some(request) = self.request.as_mut() {
            glance_info!(
                "{} stage={:?} -> {:?}",
                glance_logging::request_field(request.id),
                request.stage,
                stage
            );
            request.stage = stage;
            self.mark_dirty();
        }
    }

    pub(crate) fn fail(&mut self, failure: Failure) {
        self.failure = Some(failure);
        self.set_stage(PreviewStage::Error);
    }

    pub(crate) fn store_document(&mut self, html: String, final_url: String) {
        self.document = Some(FetchedDocument { html, final_url });
    }

    pub(crate) fn take_document(&mut self) -> Option<FetchedDocument> {
        self.document.take()
    }

    pub(crate) fn show_document(&mut self, url: String) {
        self.document_url = Some(url);
        self.mark_dirty();
    }

    pub(crate) fn set_summary(&mut self, text: String) {
        self.summary = text;
        self.mark_dirty();
    }

    fn cancel_current(&mut self, reason: &str) {
        if let Some(request) = self.request.as_mut() {
            if !request.stage.is_terminal() {
                glance_info!(
                    "{} stage={:?} -> Cancelled ({reason})",
                    glance_logging::request_field(request.id),
                    request.stage
                );
                request.stage = PreviewStage::Cancelled;
            }
        }
    }

    fn clear_outputs(&mut self) {
        self.document = None;
        self.document_url = None;
        self.summary.clear();
        self.failure = None;
    }
}
