use std::fmt;

pub const DEFAULT_SUMMARY_PROMPT: &str = "You summarize web pages for a quick preview. \
Reply with a short overview of the page followed by its key points as a bulleted list. \
Use the language of the page.";

/// Snapshot of the summarization model settings.
///
/// Owned by the settings layer; the core only reads it and may receive a
/// refreshed copy at any time.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub prompt: String,
    pub credential: Option<String>,
}

impl ModelConfig {
    /// Credential and endpoint are both present.
    pub fn is_ready(&self) -> bool {
        let has_credential = self
            .credential
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        has_credential && !self.base_url.trim().is_empty()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: String::new(),
            model: String::new(),
            prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
            credential: None,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("prompt_len", &self.prompt.len())
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ModelConfig;

    fn configured() -> ModelConfig {
        ModelConfig {
            base_url: "https://api.example.com/v1".to_string(),
            model: "small".to_string(),
            credential: Some("sk-test".to_string()),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn ready_requires_credential_and_endpoint() {
        assert!(configured().is_ready());
        assert!(!ModelConfig::default().is_ready());

        let blank_key = ModelConfig {
            credential: Some("  ".to_string()),
            ..configured()
        };
        assert!(!blank_key.is_ready());

        let no_endpoint = ModelConfig {
            base_url: String::new(),
            ..configured()
        };
        assert!(!no_endpoint.is_ready());
    }

    #[test]
    fn debug_output_redacts_credential() {
        let rendered = format!("{:?}", configured());
        assert!(!rendered.contains("sk-test"));
        assert!(rendered.contains("<redacted>"));
    }
}
