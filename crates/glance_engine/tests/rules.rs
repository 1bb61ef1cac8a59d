use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use glance_engine::{
    BypassRules, HeaderBypassRule, HeaderRuleManager, ResourceType, RuleError, RuleId,
    SessionRuleTable, SessionRules,
};
use pretty_assertions::assert_eq;
use reqwest::header::{HeaderMap, HeaderValue};

fn framed_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("content-security-policy", HeaderValue::from_static("frame-ancestors 'none'"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("content-type", HeaderValue::from_static("text/html"));
    headers
}

#[test]
fn installed_rules_strip_framing_headers_for_their_origin() {
    let table = Arc::new(SessionRuleTable::new());
    let manager = HeaderRuleManager::new(table.clone());

    let first = manager.install_bypass("https://example.com/a").unwrap();
    let second = manager.install_bypass("https://other.example:8443/b").unwrap();
    assert_eq!((first, second), (1, 2));
    assert_eq!(table.len(), 2);

    let mut headers = framed_headers();
    let removed = table.rewrite_headers("https://example.com/deep", ResourceType::MainFrame, &mut headers);
    assert_eq!(removed, 2);
    assert_eq!(headers.len(), 1);
    assert!(headers.contains_key("content-type"));

    let mut headers = framed_headers();
    assert_eq!(
        table.rewrite_headers("https://example.com/app.js", ResourceType::Script, &mut headers),
        0
    );
    assert_eq!(
        table.rewrite_headers("https://unrelated.example/", ResourceType::SubFrame, &mut headers),
        0
    );
    assert_eq!(headers.len(), 3);
}

#[test]
fn same_origin_twice_installs_two_rules() {
    let table = Arc::new(SessionRuleTable::new());
    let manager = HeaderRuleManager::new(table.clone());
    manager.install_bypass("https://example.com/a").unwrap();
    manager.install_bypass("https://example.com/b").unwrap();
    assert_eq!(manager.active_rules(), vec![1, 2]);
    assert_eq!(
        table.rules().iter().map(|r| r.origin_pattern.as_str()).collect::<Vec<_>>(),
        vec!["https://example.com/*", "https://example.com/*"]
    );
}

#[test]
fn clear_all_removes_everything_and_is_idempotent() {
    let table = Arc::new(SessionRuleTable::new());
    let manager = HeaderRuleManager::new(table.clone());
    manager.install_bypass("https://a.example/").unwrap();
    manager.install_bypass("https://b.example/").unwrap();

    assert_eq!(manager.remove_all(), 2);
    assert!(table.is_empty());
    assert!(manager.active_rules().is_empty());
    assert_eq!(manager.remove_all(), 0);

    // Ids keep counting after a clear.
    assert_eq!(manager.install_bypass("https://c.example/").unwrap(), 3);
}

#[test]
fn invalid_urls_install_nothing() {
    let table = Arc::new(SessionRuleTable::new());
    let manager = HeaderRuleManager::new(table.clone());
    let err = manager.install_bypass("about:blank").unwrap_err();
    assert_eq!(err, RuleError::InvalidUrl("about:blank".to_string()));
    assert!(table.is_empty());
    assert!(manager.active_rules().is_empty());
}

/// Backend that refuses chosen installs and any multi-rule removal.
#[derive(Default)]
struct FlakyRules {
    refuse_install: Mutex<Vec<RuleId>>,
    refuse_remove: Mutex<Vec<RuleId>>,
    installed: Mutex<Vec<RuleId>>,
    batch_attempts: AtomicUsize,
}

impl SessionRules for FlakyRules {
    fn install(&self, rule: HeaderBypassRule) -> Result<(), RuleError> {
        if self.refuse_install.lock().unwrap().contains(&rule.rule_id) {
            return Err(RuleError::Install {
                rule_id: rule.rule_id,
                reason: "quota".into(),
            });
        }
        self.installed.lock().unwrap().push(rule.rule_id);
        Ok(())
    }

    fn remove(&self, rule_ids: &[RuleId]) -> Result<(), RuleError> {
        if rule_ids.len() > 1 {
            self.batch_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(RuleError::Remove {
                rule_ids: rule_ids.to_vec(),
                reason: "batch refused".into(),
            });
        }
        if self.refuse_remove.lock().unwrap().contains(&rule_ids[0]) {
            return Err(RuleError::Remove {
                rule_ids: rule_ids.to_vec(),
                reason: "stuck".into(),
            });
        }
        self.installed.lock().unwrap().retain(|id| !rule_ids.contains(id));
        Ok(())
    }
}

#[test]
fn failed_installs_are_never_tracked() {
    let backend = Arc::new(FlakyRules::default());
    backend.refuse_install.lock().unwrap().push(2);
    let manager = HeaderRuleManager::new(backend.clone());

    manager.install_bypass("https://a.example/").unwrap();
    let err = manager.install_bypass("https://b.example/").unwrap_err();
    assert!(matches!(err, RuleError::Install { rule_id: 2, .. }));
    manager.install_bypass("https://c.example/").unwrap();

    assert_eq!(manager.active_rules(), vec![1, 3]);
}

#[test]
fn partial_removal_failure_is_best_effort() {
    let backend = Arc::new(FlakyRules::default());
    backend.refuse_remove.lock().unwrap().push(2);
    let manager = HeaderRuleManager::new(backend.clone());
    for url in ["https://a.example/", "https://b.example/", "https://c.example/"] {
        manager.install_bypass(url).unwrap();
    }

    assert_eq!(manager.remove_all(), 2);
    assert_eq!(backend.batch_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(*backend.installed.lock().unwrap(), vec![2]);
    assert!(manager.active_rules().is_empty());
    assert_eq!(manager.remove_all(), 0);
}

#[tokio::test]
async fn async_capability_delegates_to_the_manager() {
    let table = Arc::new(SessionRuleTable::new());
    let rules: Arc<dyn BypassRules> = Arc::new(HeaderRuleManager::new(table.clone()));
    assert_eq!(rules.add_bypass("https://example.com/").await, Ok(1));
    assert_eq!(rules.clear_all().await, 1);
    assert!(table.is_empty());
}
