use std::fs;
use std::path::{Path, PathBuf};

use glance_core::{ModelConfig, DEFAULT_SEARCH_TEMPLATE, DEFAULT_SUMMARY_PROMPT};
use glance_logging::{glance_info, glance_warn};
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILENAME: &str = "glance.ron";
pub const SETTINGS_PATH_VAR: &str = "GLANCE_SETTINGS";
pub const API_KEY_VAR: &str = "GLANCE_API_KEY";
pub const BASE_URL_VAR: &str = "GLANCE_BASE_URL";
pub const MODEL_VAR: &str = "GLANCE_MODEL";

/// User settings as stored in `glance.ron`. Missing fields take their defaults.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub prompt: String,
    pub api_key: Option<String>,
    pub search_template: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: String::new(),
            model: String::new(),
            prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
            api_key: None,
            search_template: DEFAULT_SEARCH_TEMPLATE.to_string(),
        }
    }
}

impl Settings {
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            provider: self.provider.clone(),
            base_url: self.base_url.trim().to_string(),
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            credential: self
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
        }
    }
}

/// `$GLANCE_SETTINGS`, else `./glance.ron`.
pub fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILENAME))
}

/// Reads settings from `path`. A missing or unreadable file yields defaults.
pub fn load_settings(path: &Path) -> Settings {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Settings::default();
        }
        Err(err) => {
            glance_warn!("Failed to read settings from {:?}: {}", path, err);
            return Settings::default();
        }
    };

    match ron::from_str::<Settings>(&content) {
        Ok(settings) => {
            glance_info!("Loaded settings from {:?}", path);
            settings
        }
        Err(err) => {
            glance_warn!("Failed to parse settings from {:?}: {}", path, err);
            Settings::default()
        }
    }
}

/// Environment variables win over the file for the credential, endpoint and model.
pub fn apply_env_overrides(mut settings: Settings, lookup: impl Fn(&str) -> Option<String>) -> Settings {
    let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
    if let Some(key) = lookup(API_KEY_VAR) {
        settings.api_key = Some(key);
    }
    if let Some(base_url) = lookup(BASE_URL_VAR) {
        settings.base_url = base_url;
    }
    if let Some(model) = lookup(MODEL_VAR) {
        settings.model = model;
    }
    settings
}

/// Settings as the process sees them right now: file plus environment.
pub fn current_settings() -> Settings {
    apply_env_overrides(load_settings(&settings_path()), |name| std::env::var(name).ok())
}
