use scraper::{Html, Selector};

/// Elements that never carry the article itself.
const BOILERPLATE: &str = "script, style, noscript, template, iframe, svg, nav, aside, form, \
     body > header, body > footer, [role=\"navigation\"], [role=\"banner\"], \
     [role=\"contentinfo\"], [aria-hidden=\"true\"]";

/// Candidate containers for the main content, most specific first.
const CONTENT_ROOTS: [&str; 4] = ["article", "main", "[role=\"main\"]", "body"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub content_html: String,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, html: &str) -> ExtractedContent;
}

/// Strips navigation, scripts and other chrome, then keeps the most specific
/// content container present (`<article>`, `<main>`, `role=main`, `<body>`),
/// falling back to the whole document.
#[derive(Debug, Default)]
pub struct MainContentExtractor;

impl Extractor for MainContentExtractor {
    fn extract(&self, html: &str) -> ExtractedContent {
        let mut doc = Html::parse_document(html);

        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| doc.select(&sel).next().map(|t| t.text().collect::<String>()))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty());

        if let Ok(sel) = Selector::parse(BOILERPLATE) {
            let ids: Vec<_> = doc.select(&sel).map(|element| element.id()).collect();
            for id in ids {
                if let Some(mut node) = doc.tree.get_mut(id) {
                    node.detach();
                }
            }
        }

        let content_html = CONTENT_ROOTS
            .iter()
            .filter_map(|root| Selector::parse(root).ok())
            .find_map(|sel| doc.select(&sel).next().map(|node| node.inner_html()))
            .unwrap_or_else(|| doc.root_element().html());

        ExtractedContent {
            title,
            content_html,
        }
    }
}

pub trait Converter: Send + Sync {
    fn to_markdown(&self, html: &str) -> String;
}

/// `html2md` with runs of blank lines collapsed and outer whitespace trimmed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Html2MdConverter;

impl Converter for Html2MdConverter {
    fn to_markdown(&self, html: &str) -> String {
        collapse_blank_lines(&html2md::parse_html(html))
    }
}

fn collapse_blank_lines(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut blank_run = 0;
    for line in markdown.trim().lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}
