use std::sync::Arc;
use std::time::Duration;

use glance_logging::{glance_debug, glance_warn};
use tokio_util::sync::CancellationToken;

use crate::extract::{Converter, Extractor, Html2MdConverter, MainContentExtractor};

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub timeout: Duration,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("document is empty")]
    EmptyDocument,
    #[error("no readable content")]
    NoContent,
    #[error("extraction timed out")]
    Timeout,
    #[error("extraction cancelled")]
    Aborted,
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Turns a fetched page into trimmed markdown: isolate the main content, then convert.
#[derive(Clone)]
pub struct ExtractionPipeline {
    extractor: Arc<dyn Extractor>,
    converter: Arc<dyn Converter>,
    settings: ExtractionSettings,
}

impl ExtractionPipeline {
    pub fn new(settings: ExtractionSettings) -> Self {
        Self::with_stages(
            Arc::new(MainContentExtractor),
            Arc::new(Html2MdConverter),
            settings,
        )
    }

    pub fn with_stages(
        extractor: Arc<dyn Extractor>,
        converter: Arc<dyn Converter>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            extractor,
            converter,
            settings,
        }
    }

    /// Cancellation and the internal timeout race the work; whichever fires first wins.
    pub async fn extract(
        &self,
        html: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ExtractionError> {
        if html.trim().is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }
        if cancel.is_cancelled() {
            return Err(ExtractionError::Aborted);
        }

        let extractor = self.extractor.clone();
        let converter = self.converter.clone();
        let html = html.to_string();
        let work = tokio::task::spawn_blocking(move || {
            let content = extractor.extract(&html);
            let body = converter.to_markdown(&content.content_html);
            match content.title {
                Some(title) if !body.trim().is_empty() && !body.contains(&title) => {
                    format!("# {title}\n\n{body}")
                }
                _ => body,
            }
        });

        let markdown = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                glance_debug!("extraction of {url} cancelled");
                return Err(ExtractionError::Aborted);
            }
            _ = tokio::time::sleep(self.settings.timeout) => {
                glance_warn!("extraction of {url} exceeded {:?}", self.settings.timeout);
                return Err(ExtractionError::Timeout);
            }
            joined = work => joined.map_err(|err| ExtractionError::ExtractionFailed(err.to_string()))?,
        };

        let markdown = markdown.trim();
        if markdown.is_empty() {
            return Err(ExtractionError::NoContent);
        }
        glance_debug!("extracted {} chars from {url}", markdown.chars().count());
        Ok(markdown.to_string())
    }
}
