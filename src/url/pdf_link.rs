use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use url::Url;

/// Returns true if the URL looks like it serves a PDF
///
/// Matches a `.pdf` path extension (any case), a `/pdf/` path segment, or a
/// `type=pdf` / `format=pdf` query parameter. Links that slip through are
/// still checked against the response content when downloaded.
pub fn is_pdf_link(url: &Url) -> bool {
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }

    if is_pdf_path(url) {
        return true;
    }

    url.query_pairs().any(|(key, value)| {
        (key == "type" || key == "format") && value.eq_ignore_ascii_case("pdf")
    })
}

/// Returns true if the path alone marks the URL as a PDF
///
/// Links recognized only by `type=pdf` / `format=pdf` need their query to
/// stay distinct.
pub fn is_pdf_path(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.ends_with(".pdf") || path.contains("/pdf/")
}

/// Derives a file name for a downloaded PDF
///
/// Uses the last non-empty path segment, percent-decoded, with `.pdf`
/// appended when missing. Falls back to `document_<timestamp>.pdf`.
pub fn filename_from_url(url: &Url, fetched_at: DateTime<Utc>) -> String {
    let last = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .filter(|s| !s.trim().is_empty());

    match last {
        Some(name) if name.to_ascii_lowercase().ends_with(".pdf") => name,
        Some(name) => format!("{}.pdf", name),
        None => format!("document_{}.pdf", fetched_at.format("%Y%m%d_%H%M%S")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_extension_match() {
        assert!(is_pdf_link(&url("https://example.com/docs/Circular_01.PDF")));
        assert!(is_pdf_link(&url("https://example.com/a.pdf?download=1")));
        assert!(!is_pdf_link(&url("https://example.com/a.pdf.html")));
    }

    #[test]
    fn test_segment_and_query_match() {
        assert!(is_pdf_link(&url("https://example.com/pdf/12345")));
        assert!(is_pdf_link(&url("https://example.com/get?id=9&type=pdf")));
        assert!(is_pdf_link(&url("https://example.com/get?format=PDF")));
        assert!(!is_pdf_link(&url("https://example.com/get?format=html")));
        assert!(!is_pdf_path(&url("https://example.com/get?id=9&type=pdf")));
        assert!(is_pdf_path(&url("https://example.com/pdf/12345?x=1")));
    }

    #[test]
    fn test_non_http_rejected() {
        assert!(!is_pdf_link(&url("ftp://example.com/a.pdf")));
    }

    #[test]
    fn test_filename_from_path() {
        let now = Utc::now();
        assert_eq!(
            filename_from_url(&url("https://example.com/docs/Resoluci%C3%B3n%20123.pdf"), now),
            "Resolución 123.pdf"
        );
        assert_eq!(
            filename_from_url(&url("https://example.com/pdf/12345"), now),
            "12345.pdf"
        );
    }

    #[test]
    fn test_filename_fallback() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(
            filename_from_url(&url("https://example.com/"), at),
            "document_20240305_140709.pdf"
        );
    }
}
