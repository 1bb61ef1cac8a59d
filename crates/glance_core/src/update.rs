use glance_logging::{glance_debug, glance_warn};
use url::Url;

use crate::{
    normalize_target_url, search_url, AppState, DragPayload, Effect, Failure, FailureKind, Msg,
    PreviewStage, RequestId,
};

/// Pure update function: applies a message to state and returns any effects.
///
/// Every message that carries a request id is dropped unless that id is still
/// the active one, so output from superseded requests never reaches the view.
pub fn update(mut state: AppState, msg: Msg) -> (AppState, Vec<Effect>) {
    let effects = match msg {
        Msg::Triggered(payload) => {
            let Some(target) = resolve_target(&state, &payload) else {
                glance_debug!("ignoring blank trigger");
                return (state, Vec::new());
            };
            match target {
                Target::Url(url) => {
                    let request_id = state.begin_request(url.clone());
                    vec![
                        Effect::CancelActive,
                        Effect::FetchDocument { request_id, url },
                    ]
                }
                Target::Invalid(raw) => {
                    state.begin_request(raw.clone());
                    state.fail(Failure::new(
                        FailureKind::InvalidUrl,
                        format!("unsupported or malformed address: {raw}"),
                    ));
                    vec![Effect::CancelActive]
                }
            }
        }
        Msg::DocumentFetched {
            request_id,
            html,
            final_url,
        } => {
            if !state.accepts(request_id, PreviewStage::Fetching) {
                return (state, Vec::new());
            }
            let url = state
                .request()
                .map(|request| request.url.clone())
                .unwrap_or_else(|| final_url.clone());
            let mut effects = vec![Effect::AddHeaderBypass {
                request_id,
                url: url.clone(),
            }];
            if !same_origin(&url, &final_url) {
                effects.push(Effect::AddHeaderBypass {
                    request_id,
                    url: final_url.clone(),
                });
            }
            state.store_document(html, final_url);
            state.set_stage(PreviewStage::Rendering);
            state.show_document(url.clone());
            effects.push(Effect::ShowDocument { request_id, url });
            effects
        }
        Msg::FetchFailed {
            request_id,
            failure,
        } => {
            apply_failure(&mut state, request_id, PreviewStage::Fetching, failure);
            Vec::new()
        }
        Msg::DocumentLoaded { request_id } => {
            if !state.accepts(request_id, PreviewStage::Rendering) {
                return (state, Vec::new());
            }
            if !state.model().is_ready() {
                state.set_stage(PreviewStage::Blocked);
                return (state, Vec::new());
            }
            match state.take_document() {
                Some(document) => {
                    state.set_stage(PreviewStage::Extracting);
                    vec![Effect::ExtractContent {
                        request_id,
                        html: document.html,
                        url: document.final_url,
                    }]
                }
                None => {
                    glance_warn!(
                        "{} loaded without a fetched document",
                        glance_logging::request_field(request_id)
                    );
                    state.fail(Failure::new(
                        FailureKind::Extraction,
                        "document missing at extraction time",
                    ));
                    Vec::new()
                }
            }
        }
        Msg::ContentExtracted {
            request_id,
            markdown,
        } => {
            if !state.accepts(request_id, PreviewStage::Extracting) {
                return (state, Vec::new());
            }
            let markdown = markdown.trim().to_string();
            if markdown.is_empty() {
                state.fail(Failure::new(FailureKind::NoContent, "empty markdown"));
                return (state, Vec::new());
            }
            // The snapshot may have been refreshed while extraction ran.
            if !state.model().is_ready() {
                state.set_stage(PreviewStage::Blocked);
                return (state, Vec::new());
            }
            state.set_stage(PreviewStage::Summarizing);
            vec![Effect::StartSummary {
                request_id,
                markdown,
                model: state.model().clone(),
            }]
        }
        Msg::ExtractionFailed {
            request_id,
            failure,
        } => {
            apply_failure(&mut state, request_id, PreviewStage::Extracting, failure);
            Vec::new()
        }
        Msg::SummaryProgress { request_id, text } => {
            if state.accepts(request_id, PreviewStage::Summarizing) {
                state.set_summary(text);
            }
            Vec::new()
        }
        Msg::SummaryDone { request_id } => {
            if state.accepts(request_id, PreviewStage::Summarizing) {
                state.set_stage(PreviewStage::Ready);
            }
            Vec::new()
        }
        Msg::SummaryFailed {
            request_id,
            failure,
        } => {
            apply_failure(&mut state, request_id, PreviewStage::Summarizing, failure);
            Vec::new()
        }
        Msg::ModelConfigRefreshed(model) => {
            state.set_model(model);
            Vec::new()
        }
        Msg::CloseRequested => {
            state.close();
            vec![Effect::CancelActive, Effect::ClearHeaderBypass]
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

enum Target {
    Url(String),
    Invalid(String),
}

fn resolve_target(state: &AppState, payload: &DragPayload) -> Option<Target> {
    match payload {
        DragPayload::Link(raw) | DragPayload::Image(raw) => {
            if raw.trim().is_empty() {
                return None;
            }
            Some(match normalize_target_url(raw) {
                Some(url) => Target::Url(url),
                None => Target::Invalid(raw.trim().to_string()),
            })
        }
        DragPayload::Text(snippet) => {
            if snippet.trim().is_empty() {
                return None;
            }
            Some(match search_url(state.search_template(), snippet) {
                Some(url) => Target::Url(url),
                None => Target::Invalid(state.search_template().to_string()),
            })
        }
    }
}

fn apply_failure(state: &mut AppState, request_id: RequestId, stage: PreviewStage, failure: Failure) {
    if failure.is_silent() {
        glance_debug!(
            "{} {:?} aborted",
            glance_logging::request_field(request_id),
            stage
        );
        return;
    }
    if !state.accepts(request_id, stage) {
        return;
    }
    glance_warn!(
        "{} failed at {:?}: {}",
        glance_logging::request_field(request_id),
        stage,
        failure
    );
    state.fail(failure);
}

fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin(),
        _ => true,
    }
}
