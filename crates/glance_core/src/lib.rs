//! Glance core: pure preview state machine, request identity and view-model helpers.
mod config;
mod effect;
mod failure;
mod identity;
mod msg;
mod state;
mod trigger;
mod update;
mod view_model;

pub use config::{ModelConfig, DEFAULT_SUMMARY_PROMPT};
pub use effect::Effect;
pub use failure::{Failure, FailureKind};
pub use identity::{RequestId, RequestIdentity};
pub use msg::Msg;
pub use state::{AppState, PreviewRequest, PreviewStage};
pub use trigger::{normalize_target_url, search_url, DragPayload, DEFAULT_SEARCH_TEMPLATE};
pub use update::update;
pub use view_model::{ErrorView, PreviewViewModel};
