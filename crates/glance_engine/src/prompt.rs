const TRUNCATED_MARKER: &str = "\n\n[truncated]";

/// Upper bound, in characters, on markdown handed to the model.
pub const MAX_SUMMARY_INPUT: usize = 48_000;

/// Caps `markdown` at [`MAX_SUMMARY_INPUT`] characters, marking the cut.
pub fn bound_markdown(markdown: &str) -> String {
    bound_to(markdown, MAX_SUMMARY_INPUT)
}

fn bound_to(markdown: &str, limit: usize) -> String {
    let Some((end, _)) = markdown.char_indices().nth(limit) else {
        return markdown.to_string();
    };
    format!("{}{TRUNCATED_MARKER}", markdown[..end].trim_end())
}

#[cfg(test)]
mod tests {
    use super::{bound_markdown, bound_to, MAX_SUMMARY_INPUT};

    #[test]
    fn short_content_kept_as_is() {
        assert_eq!(bound_markdown("short page"), "short page");
    }

    #[test]
    fn long_content_is_cut_and_marked() {
        let content = "a".repeat(MAX_SUMMARY_INPUT + 128);
        let bounded = bound_markdown(&content);
        assert!(bounded.ends_with("\n\n[truncated]"));
        assert_eq!(bounded.len(), MAX_SUMMARY_INPUT + "\n\n[truncated]".len());
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        assert_eq!(bound_to("éé", 2), "éé");
        assert_eq!(bound_to("ééé", 2), "éé\n\n[truncated]");

        let content = "é".repeat(MAX_SUMMARY_INPUT);
        assert_eq!(bound_markdown(&content), content);

        let bounded = bound_markdown(&"é".repeat(MAX_SUMMARY_INPUT + 1));
        assert_eq!(
            bounded.chars().count(),
            MAX_SUMMARY_INPUT + "\n\n[truncated]".len()
        );
    }
}
