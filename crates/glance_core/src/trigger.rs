use url::{form_urlencoded, Url};

pub const DEFAULT_SEARCH_TEMPLATE: &str = "https://duckduckgo.com/?q={query}";

/// What the gesture detector saw under the pointer when the drag crossed its threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragPayload {
    Link(String),
    Image(String),
    Text(String),
}

/// Normalize a dragged link/image address into an absolute http(s) URL.
///
/// Accepts protocol-relative (`//host/path`) and scheme-less (`host.tld/path`) input.
pub fn normalize_target_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else if !trimmed.contains("://") && looks_like_host(trimmed) {
        format!("https://{trimmed}")
    } else {
        trimmed.to_string()
    };

    let mut url = Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url.into())
}

/// Build a search URL for a text snippet; `None` when the snippet is blank.
pub fn search_url(template: &str, query: &str) -> Option<String> {
    let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if query.is_empty() {
        return None;
    }
    let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    normalize_target_url(&template.replace("{query}", &encoded))
}

fn looks_like_host(input: &str) -> bool {
    let host = input.split(['/', '?', '#']).next().unwrap_or_default();
    let (name, port) = match host.split_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    let port_ok = port.map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    port_ok
        && name.contains('.')
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '.')
}
