use crate::{ModelConfig, RequestId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Abort fetch, extraction and summary stream of any earlier request. Idempotent.
    CancelActive,
    FetchDocument {
        request_id: RequestId,
        url: String,
    },
    AddHeaderBypass {
        request_id: RequestId,
        url: String,
    },
    ShowDocument {
        request_id: RequestId,
        url: String,
    },
    ExtractContent {
        request_id: RequestId,
        html: String,
        url: String,
    },
    StartSummary {
        request_id: RequestId,
        markdown: String,
        model: ModelConfig,
    },
    /// Remove every header-bypass rule installed since the last clear.
    ClearHeaderBypass,
}
