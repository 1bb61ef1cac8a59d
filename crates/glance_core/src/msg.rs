use crate::{DragPayload, Failure, ModelConfig, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Gesture detector fired on a link, image or text snippet.
    Triggered(DragPayload),
    /// Document retrieval finished; `html` already carries the base directive.
    DocumentFetched {
        request_id: RequestId,
        html: String,
        final_url: String,
    },
    FetchFailed {
        request_id: RequestId,
        failure: Failure,
    },
    /// Presentation surface reports the document has visibly loaded.
    DocumentLoaded { request_id: RequestId },
    ContentExtracted {
        request_id: RequestId,
        markdown: String,
    },
    ExtractionFailed {
        request_id: RequestId,
        failure: Failure,
    },
    /// Accumulated summary text after the latest chunk.
    SummaryProgress { request_id: RequestId, text: String },
    SummaryDone { request_id: RequestId },
    SummaryFailed {
        request_id: RequestId,
        failure: Failure,
    },
    /// Settings layer published a new model snapshot.
    ModelConfigRefreshed(ModelConfig),
    /// User closed the panel (button or Escape).
    CloseRequested,
    NoOp,
}
