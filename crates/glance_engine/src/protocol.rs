//! Messages exchanged with the privileged worker.

use tokio::sync::{mpsc, oneshot};

use crate::rules::{RuleError, RuleId};
use crate::upstream::{ModelEndpoint, SummaryError, SummaryRequest};
use crate::{FetchError, RawDocument, RequestId};

pub type FetchReply = oneshot::Receiver<Result<RawDocument, FetchError>>;

#[derive(Debug)]
pub enum WorkerRequest {
    /// Retrieve a page with the worker's network privileges. Dropping the
    /// receiving end of `reply` aborts the retrieval.
    FetchDocument {
        request_id: RequestId,
        url: String,
        reply: oneshot::Sender<Result<RawDocument, FetchError>>,
    },
    AddCspBypass {
        url: String,
        reply: oneshot::Sender<Result<RuleId, RuleError>>,
    },
    ClearCspBypass {
        reply: oneshot::Sender<usize>,
    },
    /// Acknowledged once accepted; the stream then flows through `events`.
    GenerateSummary {
        request_id: RequestId,
        request: SummaryRequest,
        events: mpsc::Sender<SummaryMessage>,
        ack: oneshot::Sender<Result<(), SummaryError>>,
    },
    TestConnection {
        endpoint: ModelEndpoint,
        credential: String,
        reply: oneshot::Sender<Result<(), SummaryError>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryMessage {
    pub request_id: RequestId,
    pub event: SummaryEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryEvent {
    /// Append-only text, in arrival order.
    Chunk(String),
    Done,
    Error(SummaryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("privileged worker is not running")]
pub struct WorkerGone;
