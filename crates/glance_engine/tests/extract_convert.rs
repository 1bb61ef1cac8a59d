use std::sync::Arc;
use std::time::Duration;

use glance_engine::{
    decode_html, Converter, ExtractedContent, ExtractionError, ExtractionPipeline,
    ExtractionSettings, Extractor, Html2MdConverter, MainContentExtractor,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

#[test]
fn decode_respects_charset_header() {
    let bytes = b"caf\xe9"; // iso-8859-1
    let decoded = decode_html(bytes, Some("text/html; charset=ISO-8859-1"));
    assert_eq!(decoded.html, "café");
    assert!(!decoded.lossy);
}

#[test]
fn decode_handles_utf8_bom() {
    let decoded = decode_html(b"\xEF\xBB\xBFhello", Some("text/html"));
    assert_eq!(decoded.html, "hello");
    assert_eq!(decoded.encoding_label, "UTF-8");
}

#[test]
fn extractor_prefers_article_and_drops_chrome() {
    let html = r#"
    <html><head><title>Title</title><script>var x = 1;</script></head>
    <body>
        <header><a href="/">Home</a></header>
        <nav><a href="/a">A</a></nav>
        <article><h1>Heading</h1><p>Body text</p><aside>Related</aside></article>
        <footer>Copyright</footer>
    </body></html>
    "#;
    let extracted = MainContentExtractor.extract(html);
    assert_eq!(extracted.title.as_deref(), Some("Title"));
    assert!(extracted.content_html.contains("Heading"));
    assert!(extracted.content_html.contains("Body text"));
    assert!(!extracted.content_html.contains("Related"));
}

#[test]
fn extractor_falls_back_to_body_without_boilerplate() {
    let html = "<html><body><nav>Menu</nav><p>Only text</p><script>track()</script></body></html>";
    let extracted = MainContentExtractor.extract(html);
    assert_eq!(extracted.title, None);
    assert!(extracted.content_html.contains("Only text"));
    assert!(!extracted.content_html.contains("Menu"));
    assert!(!extracted.content_html.contains("track()"));
}

#[test]
fn converter_turns_html_into_markdown() {
    let md = Html2MdConverter.to_markdown("<h1>Hello</h1><p>world</p>");
    assert!(
        md.starts_with("# Hello") || md.starts_with("Hello\n=="),
        "unexpected markdown output: {md:?}"
    );
    assert!(md.ends_with("world"));
}

#[tokio::test]
async fn pipeline_yields_plain_text_for_a_minimal_page() {
    let pipeline = ExtractionPipeline::new(ExtractionSettings::default());
    let markdown = pipeline
        .extract(
            "<html><head></head><body>hi</body></html>",
            "https://x.test/p",
            &CancellationToken::new(),
        )
        .await
        .expect("extracts");
    assert_eq!(markdown, "hi");
}

#[tokio::test]
async fn pipeline_leads_with_the_title() {
    let html = "<html><head><title>X</title></head><body><article><p>A</p><p>B</p></article></body></html>";
    let pipeline = ExtractionPipeline::new(ExtractionSettings::default());
    let markdown = pipeline
        .extract(html, "https://x.test/", &CancellationToken::new())
        .await
        .expect("extracts");
    assert_eq!(markdown, "# X\n\nA\n\nB");
}

#[tokio::test]
async fn blank_documents_fail_fast() {
    let pipeline = ExtractionPipeline::new(ExtractionSettings::default());
    let err = pipeline
        .extract("  \n\t", "https://x.test/", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, ExtractionError::EmptyDocument);
}

#[tokio::test]
async fn pages_without_text_have_no_content() {
    let pipeline = ExtractionPipeline::new(ExtractionSettings::default());
    let err = pipeline
        .extract(
            "<html><body><nav>Menu</nav><script>x()</script></body></html>",
            "https://x.test/",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ExtractionError::NoContent);
}

#[tokio::test]
async fn cancelled_extraction_is_aborted() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let pipeline = ExtractionPipeline::new(ExtractionSettings::default());
    let err = pipeline
        .extract("<p>text</p>", "https://x.test/", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, ExtractionError::Aborted);
}

struct SlowExtractor(Duration);

impl Extractor for SlowExtractor {
    fn extract(&self, html: &str) -> ExtractedContent {
        std::thread::sleep(self.0);
        ExtractedContent {
            title: None,
            content_html: html.to_string(),
        }
    }
}

#[tokio::test]
async fn slow_extraction_times_out() {
    let pipeline = ExtractionPipeline::with_stages(
        Arc::new(SlowExtractor(Duration::from_millis(300))),
        Arc::new(Html2MdConverter),
        ExtractionSettings {
            timeout: Duration::from_millis(30),
        },
    );
    let err = pipeline
        .extract("<p>text</p>", "https://x.test/", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, ExtractionError::Timeout);
}

#[tokio::test]
async fn cancellation_beats_a_running_extraction() {
    let pipeline = ExtractionPipeline::with_stages(
        Arc::new(SlowExtractor(Duration::from_millis(300))),
        Arc::new(Html2MdConverter),
        ExtractionSettings::default(),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = pipeline
        .extract("<p>text</p>", "https://x.test/", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, ExtractionError::Aborted);
}
