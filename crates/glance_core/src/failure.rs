use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    Network,
    Http(u16),
    Timeout,
    Aborted,
    EmptyDocument,
    NoContent,
    Extraction,
    Configuration,
    Upstream(Option<u16>),
}

/// A stage failure as the state machine sees it: a kind plus the raw detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(FailureKind::Aborted, "aborted")
    }

    /// Aborts are the expected outcome of supersession and never reach the user.
    pub fn is_silent(&self) -> bool {
        self.kind == FailureKind::Aborted
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            FailureKind::InvalidUrl => "This link can't be previewed.".to_string(),
            FailureKind::Network => "The page could not be reached.".to_string(),
            FailureKind::Http(status) => format!("The page answered with HTTP {status}."),
            FailureKind::Timeout => "The page took too long to respond.".to_string(),
            FailureKind::Aborted => "The preview was cancelled.".to_string(),
            FailureKind::EmptyDocument | FailureKind::NoContent => {
                "No readable content was found on this page.".to_string()
            }
            FailureKind::Extraction => "The page content could not be processed.".to_string(),
            FailureKind::Configuration => {
                format!("The summary model is not configured: {}", self.message)
            }
            FailureKind::Upstream(Some(status)) => {
                format!("The summary service failed ({status}): {}", self.message)
            }
            FailureKind::Upstream(None) => {
                format!("The summary service failed: {}", self.message)
            }
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
