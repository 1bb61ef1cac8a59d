use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glance_logging::{glance_debug, glance_info, glance_warn};
use reqwest::header::HeaderMap;
use url::Url;

pub type RuleId = u32;

/// Response headers that keep a page from being shown inside a preview frame.
pub const STRIPPED_HEADERS: [&str; 3] = [
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("cannot derive an origin from {0:?}")]
    InvalidUrl(String),
    #[error("rule {rule_id} could not be installed: {reason}")]
    Install { rule_id: RuleId, reason: String },
    #[error("rules {rule_ids:?} could not be removed: {reason}")]
    Remove { rule_ids: Vec<RuleId>, reason: String },
    #[error("privileged worker is not running")]
    Unavailable,
}

/// Strips framing restrictions from document-level responses of one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBypassRule {
    pub rule_id: RuleId,
    /// `{scheme}://{host}[:{port}]/*`
    pub origin_pattern: String,
    pub resource_types: Vec<ResourceType>,
    pub removed_headers: Vec<String>,
}

impl HeaderBypassRule {
    pub fn for_url(rule_id: RuleId, url: &str) -> Result<Self, RuleError> {
        let origin_pattern = Url::parse(url)
            .ok()
            .and_then(|parsed| origin_pattern(&parsed))
            .ok_or_else(|| RuleError::InvalidUrl(url.to_string()))?;
        Ok(Self {
            rule_id,
            origin_pattern,
            resource_types: vec![ResourceType::MainFrame, ResourceType::SubFrame],
            removed_headers: STRIPPED_HEADERS.iter().map(|h| h.to_string()).collect(),
        })
    }

    pub fn matches(&self, url: &str, resource_type: ResourceType) -> bool {
        self.resource_types.contains(&resource_type)
            && Url::parse(url)
                .ok()
                .and_then(|parsed| origin_pattern(&parsed))
                .is_some_and(|pattern| pattern == self.origin_pattern)
    }
}

fn origin_pattern(url: &Url) -> Option<String> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{host}:{port}/*", url.scheme()),
        None => format!("{}://{host}/*", url.scheme()),
    })
}

/// Backend that actually holds session-scoped network rules.
pub trait SessionRules: Send + Sync {
    fn install(&self, rule: HeaderBypassRule) -> Result<(), RuleError>;
    fn remove(&self, rule_ids: &[RuleId]) -> Result<(), RuleError>;
}

/// In-process rule store that rewrites response headers for matching requests.
#[derive(Debug, Default)]
pub struct SessionRuleTable {
    rules: Mutex<BTreeMap<RuleId, HeaderBypassRule>>,
}

impl SessionRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes stripped headers in place; returns how many were dropped.
    pub fn rewrite_headers(
        &self,
        url: &str,
        resource_type: ResourceType,
        headers: &mut HeaderMap,
    ) -> usize {
        let rules = self.lock();
        let Some(rule) = rules.values().find(|rule| rule.matches(url, resource_type)) else {
            return 0;
        };
        rule.removed_headers
            .iter()
            .map(|name| headers.remove(name.as_str()).map_or(0, |_| 1))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn rules(&self) -> Vec<HeaderBypassRule> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RuleId, HeaderBypassRule>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionRules for SessionRuleTable {
    fn install(&self, rule: HeaderBypassRule) -> Result<(), RuleError> {
        let mut rules = self.lock();
        if rules.contains_key(&rule.rule_id) {
            return Err(RuleError::Install {
                rule_id: rule.rule_id,
                reason: "id already in use".to_string(),
            });
        }
        rules.insert(rule.rule_id, rule);
        Ok(())
    }

    fn remove(&self, rule_ids: &[RuleId]) -> Result<(), RuleError> {
        let mut rules = self.lock();
        for id in rule_ids {
            rules.remove(id);
        }
        Ok(())
    }
}

/// Owns the set of bypass rules installed since the last clear.
pub struct HeaderRuleManager {
    backend: Arc<dyn SessionRules>,
    next_id: AtomicU32,
    active: Mutex<BTreeSet<RuleId>>,
}

impl HeaderRuleManager {
    pub fn new(backend: Arc<dyn SessionRules>) -> Self {
        Self {
            backend,
            next_id: AtomicU32::new(1),
            active: Mutex::new(BTreeSet::new()),
        }
    }

    /// Installs a bypass for the origin of `url`. Ids are only tracked once installed.
    pub fn install_bypass(&self, url: &str) -> Result<RuleId, RuleError> {
        let rule_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rule = HeaderBypassRule::for_url(rule_id, url)?;
        let origin = rule.origin_pattern.clone();
        if let Err(err) = self.backend.install(rule) {
            glance_warn!("header bypass for {origin} not installed: {err}");
            return Err(err);
        }
        self.lock_active().insert(rule_id);
        glance_info!("header bypass rule={rule_id} installed for {origin}");
        Ok(rule_id)
    }

    /// Removes every tracked rule. Never fails; returns how many were removed.
    pub fn remove_all(&self) -> usize {
        let ids: Vec<RuleId> = std::mem::take(&mut *self.lock_active()).into_iter().collect();
        if ids.is_empty() {
            glance_debug!("no header bypass rules to clear");
            return 0;
        }
        match self.backend.remove(&ids) {
            Ok(()) => {
                glance_info!("cleared {} header bypass rules", ids.len());
                ids.len()
            }
            Err(err) => {
                glance_warn!("batch rule removal failed ({err}), removing one by one");
                let mut removed = 0;
                for id in ids {
                    match self.backend.remove(&[id]) {
                        Ok(()) => removed += 1,
                        Err(err) => glance_warn!("rule={id} left behind: {err}"),
                    }
                }
                removed
            }
        }
    }

    pub fn active_rules(&self) -> Vec<RuleId> {
        self.lock_active().iter().copied().collect()
    }

    fn lock_active(&self) -> MutexGuard<'_, BTreeSet<RuleId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Awaitable bypass-rule capability, local or behind the privileged worker.
#[async_trait::async_trait]
pub trait BypassRules: Send + Sync {
    async fn add_bypass(&self, url: &str) -> Result<RuleId, RuleError>;
    async fn clear_all(&self) -> usize;
}

#[async_trait::async_trait]
impl BypassRules for HeaderRuleManager {
    async fn add_bypass(&self, url: &str) -> Result<RuleId, RuleError> {
        self.install_bypass(url)
    }

    async fn clear_all(&self) -> usize {
        self.remove_all()
    }
}
