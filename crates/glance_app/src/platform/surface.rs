use std::io::Write;
use std::sync::{Mutex, PoisonError};

use glance_core::{Msg, PreviewStage, PreviewViewModel, RequestId};
use tokio::sync::mpsc::UnboundedSender;

/// Where previews are shown. Implementations must call [`LoadNotifier::notify`]
/// once the document is visibly loaded.
pub trait PreviewSurface: Send + Sync {
    fn render(&self, view: &PreviewViewModel);
    fn load_document(&self, url: &str, loaded: LoadNotifier);
}

/// One-shot "document is on screen" report for a specific request.
#[derive(Debug)]
pub struct LoadNotifier {
    request_id: RequestId,
    msg_tx: UnboundedSender<Msg>,
}

impl LoadNotifier {
    pub fn new(request_id: RequestId, msg_tx: UnboundedSender<Msg>) -> Self {
        Self { request_id, msg_tx }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn notify(self) {
        let _ = self.msg_tx.send(Msg::DocumentLoaded {
            request_id: self.request_id,
        });
    }
}

/// Line-oriented surface: stage changes, the summary as it streams, errors with a direct link.
pub struct TerminalSurface<W: Write + Send> {
    inner: Mutex<TerminalState<W>>,
}

struct TerminalState<W> {
    out: W,
    shown: Option<(Option<RequestId>, PreviewStage)>,
    summary_len: usize,
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Mutex::new(TerminalState {
                out,
                shown: None,
                summary_len: 0,
            }),
        }
    }
}

impl<W: Write + Send> PreviewSurface for TerminalSurface<W> {
    fn render(&self, view: &PreviewViewModel) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let key = (view.request_id, view.stage);
        let stage_changed = state.shown != Some(key);

        if view.request_id != state.shown.and_then(|(id, _)| id) {
            state.summary_len = 0;
        }

        if view.summary.len() > state.summary_len && view.summary.is_char_boundary(state.summary_len) {
            let _ = write!(state.out, "{}", &view.summary[state.summary_len..]);
            state.summary_len = view.summary.len();
        }

        if stage_changed {
            if state.summary_len > 0 {
                let _ = writeln!(state.out);
            }
            write_stage(&mut state.out, view);
            state.shown = Some(key);
        }
        let _ = state.out.flush();
    }

    fn load_document(&self, url: &str, loaded: LoadNotifier) {
        {
            let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(state.out, "[glance] document {url}");
            let _ = state.out.flush();
        }
        // Nothing to paint in a terminal; the page counts as loaded immediately.
        loaded.notify();
    }
}

fn write_stage<W: Write>(out: &mut W, view: &PreviewViewModel) {
    let url = view.url.as_deref().unwrap_or("");
    let _ = match view.stage {
        PreviewStage::Idle => writeln!(out, "[glance] idle"),
        PreviewStage::Fetching => writeln!(out, "[glance] fetching {url}"),
        PreviewStage::Rendering => writeln!(out, "[glance] rendering"),
        PreviewStage::Extracting => writeln!(out, "[glance] extracting content"),
        PreviewStage::Summarizing => writeln!(out, "[glance] summarizing"),
        PreviewStage::Ready => writeln!(out, "[glance] done"),
        PreviewStage::Cancelled => writeln!(out, "[glance] cancelled"),
        PreviewStage::Blocked => writeln!(
            out,
            "[glance] summaries need a model: set GLANCE_API_KEY and GLANCE_BASE_URL or edit glance.ron"
        ),
        PreviewStage::Error => match &view.error {
            Some(error) => writeln!(
                out,
                "[glance] {}\n[glance] open directly: {}",
                error.message,
                error.open_url.as_deref().unwrap_or(url)
            ),
            None => writeln!(out, "[glance] failed"),
        },
    };
}
