use crate::{PreviewStage, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorView {
    pub message: String,
    /// Escape hatch: open the real page directly.
    pub open_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviewViewModel {
    pub request_id: Option<RequestId>,
    pub stage: PreviewStage,
    pub url: Option<String>,
    /// Address handed to the frame once the document is fetched.
    pub document_url: Option<String>,
    pub summary: String,
    pub error: Option<ErrorView>,
    pub show_config_prompt: bool,
    pub model_ready: bool,
    pub dirty: bool,
}
