//! Page extraction
//!
//! Turns one raw HTTP response into structured page data:
//! - Cleaned text and Markdown
//! - Title, description, author and publication date
//! - Word, link, image, code block and table counts
//! - Outgoing links (from `<a href>` and canonical links) with anchor text
//! - A content hash for change detection
//!
//! Extraction is a pure function of the response: identical bytes always
//! produce an identical page and hash.

use encoding_rs::{Encoding, UTF_8};
use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// How far into an HTML body a `<meta charset>` declaration is looked for
const CHARSET_PRESCAN_BYTES: usize = 1024;

/// Elements whose text never reaches the cleaned content
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// A response as received by the fetcher
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The URL that was requested
    pub requested_url: Url,
    /// URL after following redirects
    pub final_url: Url,
    pub status: u16,
    /// Content-Type header value, if any
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// The MIME type without parameters, lowercased
    pub fn mime_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
    }

    /// The `charset` parameter of the Content-Type header
    pub fn charset(&self) -> Option<&str> {
        self.content_type.as_deref()?.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches(|c: char| c == '"' || c == '\''))
                .filter(|v| !v.is_empty())
        })
    }

    fn is_html(&self) -> bool {
        match self.mime_type() {
            Some(mime) => mime == "text/html" || mime == "application/xhtml+xml",
            // Content sniffing is out of scope; assume HTML
            None => true,
        }
    }
}

/// Errors that make a response unusable as a page
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("empty response body")]
    EmptyBody,
}

/// An outgoing link found on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// Absolute URL, resolved against the page's base URL
    pub url: String,
    pub anchor_text: Option<String>,
}

/// Structured data extracted from a page
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub text_content: String,
    pub markdown: String,
    pub word_count: u64,
    pub link_count: u64,
    pub image_count: u64,
    pub code_block_count: u64,
    pub table_count: u64,
    pub links: Vec<ExtractedLink>,
    pub content_hash: String,
}

/// Extracts structured page data from a raw response
///
/// # Arguments
///
/// * `response` - The fetched response
///
/// # Returns
///
/// * `Ok(ExtractedPage)` - The extracted page
/// * `Err(ExtractionError)` - The body is empty
///
/// The body is decoded with the charset from the Content-Type header, then a
/// `<meta charset>` declaration near the top of an HTML document, then UTF-8.
/// A byte order mark overrides all of them. Undecodable bytes become U+FFFD.
///
/// # Example
///
/// ```
/// use lantern_crawl::crawler::{extract, RawResponse};
/// use url::Url;
///
/// let url = Url::parse("https://example.com/").unwrap();
/// let response = RawResponse {
///     requested_url: url.clone(),
///     final_url: url,
///     status: 200,
///     content_type: Some("text/html".to_string()),
///     body: b"<html><head><title>Test</title></head><body><a href=\"/page\">Link</a></body></html>".to_vec(),
/// };
/// let page = extract(&response).unwrap();
/// assert_eq!(page.title.as_deref(), Some("Test"));
/// assert_eq!(page.links[0].url, "https://example.com/page");
/// ```
pub fn extract(response: &RawResponse) -> Result<ExtractedPage, ExtractionError> {
    let (body, encoding, lossy) = detect_encoding(response).decode(&response.body);
    if lossy {
        tracing::debug!(
            url = %response.final_url,
            encoding = encoding.name(),
            "Replaced undecodable bytes"
        );
    }
    let body = body.as_ref();
    if body.trim().is_empty() {
        return Err(ExtractionError::EmptyBody);
    }

    if !response.is_html() {
        return Ok(extract_plain_text(body));
    }

    let document = Html::parse_document(body);
    let base_url = base_url(&document, &response.final_url);

    let text_content = cleaned_text(&document);
    let links = extract_links(&document, &base_url);

    Ok(ExtractedPage {
        title: extract_title(&document),
        description: first_meta(
            &document,
            &["meta[name='description']", "meta[property='og:description']"],
        ),
        author: first_meta(
            &document,
            &["meta[name='author']", "meta[property='article:author']"],
        ),
        published_at: extract_published_at(&document),
        word_count: text_content.split_whitespace().count() as u64,
        markdown: html_to_markdown(&document, &text_content),
        link_count: links.len() as u64,
        image_count: count(&document, "img"),
        code_block_count: count(&document, "pre"),
        table_count: count(&document, "table"),
        content_hash: content_hash(&text_content),
        text_content,
        links,
    })
}

/// Computes the content hash of cleaned text (SHA-256, hex)
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn detect_encoding(response: &RawResponse) -> &'static Encoding {
    let declared = response.charset().map(str::to_string).or_else(|| {
        response
            .is_html()
            .then(|| meta_charset(&response.body))
            .flatten()
    });
    declared
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8)
}

/// Finds a `charset=` declaration in the head of an HTML document
///
/// Covers both `<meta charset="...">` and the `http-equiv` form whose
/// `content` attribute carries a Content-Type value.
fn meta_charset(body: &[u8]) -> Option<String> {
    let prefix = &body[..body.len().min(CHARSET_PRESCAN_BYTES)];
    let head = String::from_utf8_lossy(prefix).to_ascii_lowercase();
    let start = head.find("<meta")?;
    let at = head[start..].find("charset=")? + start + "charset=".len();

    let label: String = head[at..]
        .trim_start_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
        .chars()
        .take_while(|&c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    (!label.is_empty()).then_some(label)
}

fn extract_plain_text(body: &str) -> ExtractedPage {
    let text_content = collapse_whitespace(body);
    ExtractedPage {
        title: None,
        description: None,
        author: None,
        published_at: None,
        word_count: text_content.split_whitespace().count() as u64,
        markdown: text_content.clone(),
        link_count: 0,
        image_count: 0,
        code_block_count: 0,
        table_count: 0,
        links: Vec::new(),
        content_hash: content_hash(&text_content),
        text_content,
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn count(document: &Html, css: &str) -> u64 {
    selector(css).map_or(0, |s| document.select(&s).count() as u64)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Uses `<base href>` when present, otherwise the final URL
fn base_url(document: &Html, final_url: &Url) -> Url {
    selector("base[href]")
        .and_then(|s| {
            document
                .select(&s)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| final_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| final_url.clone())
}

/// Page title: `<title>`, then `og:title`, then the first `<h1>`
fn extract_title(document: &Html) -> Option<String> {
    let from_title = selector("title").and_then(|s| {
        document
            .select(&s)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    });

    from_title
        .or_else(|| first_meta(document, &["meta[property='og:title']"]))
        .or_else(|| {
            selector("h1").and_then(|s| {
                document
                    .select(&s)
                    .next()
                    .map(element_text)
                    .filter(|t| !t.is_empty())
            })
        })
}

/// First non-empty `content` attribute among the given meta selectors
fn first_meta(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let s = selector(css)?;
        document
            .select(&s)
            .filter_map(|el| el.value().attr("content"))
            .map(collapse_whitespace)
            .find(|c| !c.is_empty())
    })
}

fn extract_published_at(document: &Html) -> Option<String> {
    first_meta(document, &["meta[property='article:published_time']"]).or_else(|| {
        let s = selector("time[datetime]")?;
        document
            .select(&s)
            .filter_map(|el| el.value().attr("datetime"))
            .map(|d| d.trim().to_string())
            .find(|d| !d.is_empty())
    })
}

/// Visible text of the body, scripts and styles excluded
fn cleaned_text(document: &Html) -> String {
    let root = selector("body")
        .and_then(|s| document.select(&s).next())
        .unwrap_or_else(|| document.root_element());

    let mut raw = String::new();
    collect_text(root, &mut raw);
    collapse_whitespace(&raw)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if SKIPPED_TAGS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    // Element boundaries separate words
                    out.push(' ');
                    collect_text(child, out);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Converts the body to Markdown, falling back to the cleaned text
fn html_to_markdown(document: &Html, text_content: &str) -> String {
    let root = selector("body")
        .and_then(|s| document.select(&s).next())
        .unwrap_or_else(|| document.root_element());

    let mut html = root.html();
    for tag in SKIPPED_TAGS {
        if let Some(s) = selector(tag) {
            for element in root.select(&s) {
                html = html.replace(&element.html(), "");
            }
        }
    }

    match htmd::convert(&html) {
        Ok(markdown) => markdown.trim().to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "Markdown conversion failed, using plain text");
            text_content.to_string()
        }
    }
}

/// Extracts all followable links from the document
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
/// - Non-HTTP(S) URLs after resolution
///
/// Links are deduplicated by absolute URL, keeping the first anchor text.
fn extract_links(document: &Html, base_url: &Url) -> Vec<ExtractedLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    if let Some(a_selector) = selector("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            else {
                continue;
            };
            if seen.insert(url.clone()) {
                let text = element_text(element);
                let anchor_text = (!text.is_empty()).then_some(text);
                links.push(ExtractedLink { url, anchor_text });
            }
        }
    }

    if let Some(canonical_selector) = selector("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                if seen.insert(url.clone()) {
                    links.push(ExtractedLink {
                        url,
                        anchor_text: None,
                    });
                }
            }
        }
    }

    links
}

/// Resolves a link href to an absolute URL and validates it
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(html: &str) -> RawResponse {
        let url = Url::parse("https://example.com/page").unwrap();
        RawResponse {
            requested_url: url.clone(),
            final_url: url,
            status: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: html.as_bytes().to_vec(),
        }
    }

    fn extract_html(html: &str) -> ExtractedPage {
        extract(&response(html)).unwrap()
    }

    fn link_urls(page: &ExtractedPage) -> Vec<&str> {
        page.links.iter().map(|l| l.url.as_str()).collect()
    }

    #[test]
    fn test_extract_title_with_whitespace() {
        let page = extract_html("<html><head><title>  Test   Page  </title></head><body></body></html>");
        assert_eq!(page.title.as_deref(), Some("Test Page"));
    }

    #[test]
    fn test_title_fallbacks() {
        let page = extract_html(
            r#"<html><head><meta property="og:title" content="OG Title"></head><body><h1>Heading</h1></body></html>"#,
        );
        assert_eq!(page.title.as_deref(), Some("OG Title"));

        let page = extract_html("<html><body><h1> Heading </h1></body></html>");
        assert_eq!(page.title.as_deref(), Some("Heading"));

        let page = extract_html("<html><body><p>text</p></body></html>");
        assert_eq!(page.title, None);
    }

    #[test]
    fn test_metadata() {
        let page = extract_html(
            r#"<html><head>
                <meta name="description" content="A  page about things">
                <meta name="author" content="Sam Doe">
                <meta property="article:published_time" content="2024-03-01T09:00:00Z">
            </head><body></body></html>"#,
        );
        assert_eq!(page.description.as_deref(), Some("A page about things"));
        assert_eq!(page.author.as_deref(), Some("Sam Doe"));
        assert_eq!(page.published_at.as_deref(), Some("2024-03-01T09:00:00Z"));

        let page = extract_html(r#"<html><body><time datetime="2023-12-24">Dec 24</time></body></html>"#);
        assert_eq!(page.published_at.as_deref(), Some("2023-12-24"));
    }

    #[test]
    fn test_cleaned_text_skips_scripts_and_styles() {
        let page = extract_html(
            "<html><head><style>body{}</style></head><body><p>Hello</p><script>var x = 1;</script><p>world</p><noscript>enable js</noscript></body></html>",
        );
        assert_eq!(page.text_content, "Hello world");
        assert_eq!(page.word_count, 2);
        assert!(!page.markdown.contains("var x"));
    }

    #[test]
    fn test_counts() {
        let page = extract_html(
            r#"<html><body>
                <img src="a.png"><img src="b.png">
                <pre><code>fn main() {}</code></pre>
                <table><tr><td>1</td></tr></table>
                <a href="/a">A</a><a href="/b">B</a><a href="/a">A again</a>
            </body></html>"#,
        );
        assert_eq!(page.image_count, 2);
        assert_eq!(page.code_block_count, 1);
        assert_eq!(page.table_count, 1);
        assert_eq!(page.link_count, 2);
    }

    #[test]
    fn test_markdown_conversion() {
        let page = extract_html("<html><body><h1>Title</h1><p>Some <strong>bold</strong> text</p></body></html>");
        assert!(page.markdown.contains("# Title"));
        assert!(page.markdown.contains("**bold**"));
    }

    #[test]
    fn test_links_resolve_and_keep_anchor_text() {
        let page = extract_html(
            r#"<html><body>
                <a href="https://other.com/page">Other</a>
                <a href="/root"> Root   link </a>
                <a href="sibling"><img src="x.png"></a>
            </body></html>"#,
        );
        assert_eq!(
            link_urls(&page),
            vec![
                "https://other.com/page",
                "https://example.com/root",
                "https://example.com/sibling"
            ]
        );
        assert_eq!(page.links[1].anchor_text.as_deref(), Some("Root link"));
        assert_eq!(page.links[2].anchor_text, None);
    }

    #[test]
    fn test_skip_unfollowable_links() {
        let page = extract_html(
            r##"<html><body>
                <a href="javascript:void(0)">js</a>
                <a href="JavaScript:alert(1)">js</a>
                <a href="mailto:test@example.com">mail</a>
                <a href="tel:+1234567890">call</a>
                <a href="data:text/html,hi">data</a>
                <a href="#section">jump</a>
                <a href="/file.pdf" download>download</a>
                <a href="ftp://example.com/file">ftp</a>
                <a href="/valid" rel="nofollow">valid</a>
            </body></html>"##,
        );
        assert_eq!(link_urls(&page), vec!["https://example.com/valid"]);
    }

    #[test]
    fn test_canonical_link_and_base_href() {
        let page = extract_html(
            r#"<html><head>
                <base href="https://example.com/docs/">
                <link rel="canonical" href="https://example.com/canonical">
            </head><body><a href="intro">Intro</a></body></html>"#,
        );
        assert_eq!(
            link_urls(&page),
            vec!["https://example.com/docs/intro", "https://example.com/canonical"]
        );
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let html = "<html><body><p>Same content</p></body></html>";
        assert_eq!(extract_html(html).content_hash, extract_html(html).content_hash);

        let other = extract_html("<html><body><p>Different content</p></body></html>");
        assert_ne!(extract_html(html).content_hash, other.content_hash);
        assert_eq!(extract_html(html).content_hash.len(), 64);
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(extract(&response("  \n ")), Err(ExtractionError::EmptyBody));
    }

    fn latin1_response(content_type: &str, html: &str) -> RawResponse {
        let mut raw = response("");
        raw.content_type = Some(content_type.to_string());
        // Every char below U+0100 maps to the same Latin-1 byte
        raw.body = html.chars().map(|c| c as u8).collect();
        raw
    }

    #[test]
    fn test_decodes_charset_from_content_type() {
        let raw = latin1_response(
            "text/html; charset=ISO-8859-1",
            "<html><head><title>Café</title></head><body><p>Crème brûlée</p></body></html>",
        );
        assert_eq!(raw.charset(), Some("ISO-8859-1"));
        assert!(std::str::from_utf8(&raw.body).is_err());

        let page = extract(&raw).unwrap();
        assert_eq!(page.title.as_deref(), Some("Café"));
        assert_eq!(page.text_content, "Crème brûlée");
    }

    #[test]
    fn test_decodes_charset_from_meta_tag() {
        let raw = latin1_response(
            "text/html",
            "<html><head><meta charset=\"windows-1252\"><title>Café</title></head><body></body></html>",
        );
        assert_eq!(raw.charset(), None);
        assert_eq!(extract(&raw).unwrap().title.as_deref(), Some("Café"));

        let http_equiv = latin1_response(
            "text/html",
            "<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\">\
             <title>Café</title></head><body></body></html>",
        );
        assert_eq!(extract(&http_equiv).unwrap().title.as_deref(), Some("Café"));
    }

    #[test]
    fn test_header_charset_wins_over_meta() {
        let raw = latin1_response(
            "text/html; charset=\"iso-8859-1\"",
            "<html><head><meta charset=\"utf-8\"><title>Café</title></head><body></body></html>",
        );
        assert_eq!(extract(&raw).unwrap().title.as_deref(), Some("Café"));
    }

    #[test]
    fn test_undecodable_bytes_are_replaced() {
        let mut invalid = response("");
        invalid.body = b"<html><head><title>bad \xff byte</title></head></html>".to_vec();
        let page = extract(&invalid).unwrap();
        assert_eq!(page.title.as_deref(), Some("bad \u{FFFD} byte"));
    }

    #[test]
    fn test_plain_text_response() {
        let mut plain = response("just   some\ntext");
        plain.content_type = Some("text/plain".to_string());
        let page = extract(&plain).unwrap();
        assert_eq!(page.text_content, "just some text");
        assert_eq!(page.word_count, 3);
        assert!(page.links.is_empty());
    }
}
