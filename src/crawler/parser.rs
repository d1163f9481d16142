//! HTML parsing for PDF discovery and text extraction
//!
//! This module handles parsing fetched pages to extract:
//! - Links whose target is a PDF ([`discover_pdfs`])
//! - Title and readable main-content text ([`extract_page_content`])

use crate::crawler::fetcher::FetchResult;
use crate::url::{is_pdf_link, is_pdf_path, normalize_parsed, QueryPolicy};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Containers tried in order when looking for a page's main content
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "div#content",
    ".content",
    ".main-content",
    ".document-content",
    ".texto-concepto",
    ".contenido-normograma",
    "section",
    "#container",
    ".container",
];

/// Elements whose text is never part of the content
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "template",
];

/// A container must yield at least this much text to be preferred over `<body>`
const MIN_CONTAINER_TEXT: usize = 100;

/// A link to a PDF found on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfCandidate {
    pub source_page_url: Url,
    /// Resolved and normalized target
    pub absolute_url: Url,
    pub anchor_text: String,
}

/// Title and main text of an HTML page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContent {
    pub title: Option<String>,
    pub text: String,
}

/// Finds links to PDFs on a fetched page
///
/// Hrefs are resolved against the page's `<base href>` when present, else its
/// final URL, filtered with [`is_pdf_link`], normalized under `policy`, and
/// deduplicated. Order of first appearance is kept and the first anchor text
/// for a URL wins.
///
/// Never fails: a body that is not HTML yields an empty list.
///
/// # Example
///
/// ```
/// use regdoc_harvester::crawler::{discover_pdfs, FetchResult};
/// use regdoc_harvester::url::QueryPolicy;
/// use url::Url;
///
/// let page_url = Url::parse("https://example.gov.co/normativa/").unwrap();
/// let page = FetchResult {
///     url: page_url.clone(),
///     final_url: page_url,
///     status_code: 200,
///     body: br#"<a href="circular.pdf">Circular 1</a>"#.to_vec(),
///     content_type: Some("text/html".to_string()),
///     fetched_at: chrono::Utc::now(),
///     elapsed_ms: 12,
/// };
/// let found = discover_pdfs(&page, QueryPolicy::Preserve);
/// assert_eq!(found[0].absolute_url.as_str(), "https://example.gov.co/normativa/circular.pdf");
/// ```
pub fn discover_pdfs(page: &FetchResult, policy: QueryPolicy) -> Vec<PdfCandidate> {
    if let Some(mime) = page.mime_type() {
        if !is_html_mime(&mime) {
            tracing::warn!(
                "Not scanning {} for PDFs: content type is {}",
                page.final_url,
                mime
            );
            return Vec::new();
        }
    }

    let document = Html::parse_document(&page.text());
    let base = base_href(&document, &page.final_url).unwrap_or_else(|| page.final_url.clone());

    let Ok(anchor_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for element in document.select(&anchor_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(resolved) = resolve_link(href, &base) else {
            continue;
        };
        if !is_pdf_link(&resolved) {
            continue;
        }
        // Query-identified links keep their query even under Strip
        let link_policy = if is_pdf_path(&resolved) {
            policy
        } else {
            QueryPolicy::Preserve
        };
        let Ok(normalized) = normalize_parsed(&resolved, link_policy) else {
            continue;
        };
        if !seen.insert(normalized.to_string()) {
            continue;
        }

        candidates.push(PdfCandidate {
            source_page_url: page.final_url.clone(),
            absolute_url: normalized,
            anchor_text: anchor_text(&element),
        });
    }

    tracing::debug!(
        "Found {} distinct PDF link(s) on {}",
        candidates.len(),
        page.final_url
    );
    candidates
}

/// Extracts the title and readable text of an HTML page
///
/// The first content container (see the selector list) with enough text is
/// used; otherwise the whole `<body>`. Scripts, styles and page chrome are
/// skipped and whitespace is collapsed.
pub fn extract_page_content(html: &str) -> PageContent {
    let document = Html::parse_document(html);
    let title = extract_title(&document);

    let from_container = CONTENT_SELECTORS.iter().find_map(|selector| {
        let selector = Selector::parse(selector).ok()?;
        document
            .select(&selector)
            .map(|element| visible_text(&element))
            .find(|text| text.chars().count() >= MIN_CONTAINER_TEXT)
    });

    let text = from_container.unwrap_or_else(|| {
        Selector::parse("body")
            .ok()
            .and_then(|body| document.select(&body).next().map(|e| visible_text(&e)))
            .unwrap_or_default()
    });

    PageContent { title, text }
}

fn is_html_mime(mime: &str) -> bool {
    mime.is_empty() || mime == "text/html" || mime == "application/xhtml+xml" || mime == "text/plain"
}

/// Page title from `<title>`, falling back to the first `<h1>`
fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        document
            .select(&selector)
            .next()
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .filter(|s| !s.is_empty())
    })
}

fn base_href(document: &Html, page_url: &Url) -> Option<Url> {
    let selector = Selector::parse("base[href]").ok()?;
    let href = document.select(&selector).next()?.value().attr("href")?;
    page_url.join(href.trim()).ok()
}

/// Anchor text, falling back to the `title` attribute
fn anchor_text(element: &ElementRef<'_>) -> String {
    let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
    if !text.is_empty() {
        return text;
    }
    element
        .value()
        .attr("title")
        .map(collapse_whitespace)
        .unwrap_or_default()
}

/// Text of an element, skipping non-content descendants
fn visible_text(element: &ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !skipped {
            parts.push(&**text);
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves a link href to an absolute URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel:, data: schemes
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then_some(absolute)
}
