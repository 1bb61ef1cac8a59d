//! Glance engine: document retrieval, header rules, content extraction and
//! streamed summaries, plus the privileged worker that hosts them.
mod base;
mod decode;
mod extract;
mod fetch;
mod pipeline;
mod prompt;
mod protocol;
mod rules;
mod sse;
mod summary;
mod types;
mod upstream;
mod worker;

pub use base::inject_base_href;
pub use decode::{decode_html, DecodedHtml};
pub use extract::{Converter, ExtractedContent, Extractor, Html2MdConverter, MainContentExtractor};
pub use fetch::{
    select_fetcher, DirectFetcher, DocumentFetcher, FetchSettings, ProxyFetcher, ProxySettings,
};
pub use pipeline::{ExtractionError, ExtractionPipeline, ExtractionSettings};
pub use prompt::{bound_markdown, MAX_SUMMARY_INPUT};
pub use protocol::{FetchReply, SummaryEvent, SummaryMessage, WorkerGone, WorkerRequest};
pub use rules::{
    BypassRules, HeaderBypassRule, HeaderRuleManager, ResourceType, RuleError, RuleId,
    SessionRuleTable, SessionRules, STRIPPED_HEADERS,
};
pub use sse::{content_delta, SseLineBuffer, SseRecord};
pub use summary::{
    ActivityCheck, SummaryStreamController, SummaryStreamSession, SummaryTransport, SummaryUpdate,
};
pub use types::{FailureKind, FetchError, FetchedDocument, RawDocument, RequestId};
pub use upstream::{
    error_detail, ChatClient, ModelEndpoint, StreamSettings, SummaryError, SummaryRequest,
};
pub use worker::{spawn_worker, WorkerHandle, WorkerSettings};
