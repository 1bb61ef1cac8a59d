use url::Url;

/// Inject a `<base href>` so relative links and resources resolve against the page's
/// real address once the document is shown outside its origin.
///
/// Uses `final_url` when it parses, else `original_url`. The directive goes right after
/// the opening `<head>` tag; without one it is prepended.
pub fn inject_base_href(html: &str, final_url: Option<&str>, original_url: &str) -> String {
    let href = final_url
        .filter(|candidate| Url::parse(candidate).is_ok())
        .unwrap_or(original_url);
    let directive = format!("<base href=\"{}\">", escape_attribute(href));

    match head_insertion_point(html) {
        Some(index) => {
            let mut rewritten = String::with_capacity(html.len() + directive.len());
            rewritten.push_str(&html[..index]);
            rewritten.push_str(&directive);
            rewritten.push_str(&html[index..]);
            rewritten
        }
        None => format!("{directive}{html}"),
    }
}

/// Byte offset just past the `>` of the first `<head ...>` tag.
fn head_insertion_point(html: &str) -> Option<usize> {
    // ASCII lowercasing keeps byte offsets identical.
    let lower = html.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = lower[from..].find("<head") {
        let after = from + found + "<head".len();
        match lower.as_bytes().get(after) {
            Some(b'>') => return Some(after + 1),
            Some(byte) if byte.is_ascii_whitespace() || *byte == b'/' => {
                return lower[after..].find('>').map(|end| after + end + 1);
            }
            // `<header>` and friends
            _ => from = after,
        }
    }
    None
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
