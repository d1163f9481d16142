use crate::UrlError;
use serde::Deserialize;
use url::{form_urlencoded, Url};

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// How the query string takes part in URL identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPolicy {
    /// Keep the query, minus tracking parameters, with parameters sorted
    #[default]
    Preserve,
    /// Drop the whole query string
    Strip,
}

/// Normalizes a URL for deduplication and fetching
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase the host (the port is kept)
/// 3. Collapse repeated slashes in the path; dot segments are resolved by the parser
/// 4. Remove the fragment
/// 5. Apply the [`QueryPolicy`]:
///    - `Preserve`: remove tracking parameters and sort the rest by key
///    - `Strip`: remove the query entirely
///
/// The scheme and any `www.` prefix are left alone: the result is also the
/// URL that gets requested, and the server decides what those mean.
///
/// # Examples
///
/// ```
/// use regdoc_harvester::url::{normalize_url, QueryPolicy};
///
/// let url = normalize_url("https://Example.GOV.co/docs//a.pdf?v=2#p3", QueryPolicy::Strip).unwrap();
/// assert_eq!(url.as_str(), "https://example.gov.co/docs/a.pdf");
/// ```
pub fn normalize_url(url_str: &str, policy: QueryPolicy) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_in_place(&mut url, policy)?;
    Ok(url)
}

/// Same as [`normalize_url`] for an already parsed URL
pub fn normalize_parsed(url: &Url, policy: QueryPolicy) -> Result<Url, UrlError> {
    let mut url = url.clone();
    normalize_in_place(&mut url, policy)?;
    Ok(url)
}

fn normalize_in_place(url: &mut Url, policy: QueryPolicy) -> Result<(), UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Parse(format!("Failed to set host: {}", e)))?;

    if url.path().contains("//") {
        let collapsed = collapse_slashes(url.path());
        url.set_path(&collapsed);
    }

    url.set_fragment(None);

    match policy {
        QueryPolicy::Strip => url.set_query(None),
        QueryPolicy::Preserve => {
            if let Some(query) = url.query() {
                let kept = filter_and_sort_query(query);
                url.set_query((!kept.is_empty()).then_some(kept.as_str()));
            }
        }
    }

    Ok(())
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' && previous_slash {
            continue;
        }
        previous_slash = c == '/';
        out.push(c);
    }
    out
}

/// Drops tracking parameters and sorts the rest by key
///
/// Segments are kept as written: a valueless `download` stays `download`
/// and values are not re-encoded.
fn filter_and_sort_query(query: &str) -> String {
    let mut segments: Vec<(String, &str)> = query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            let (key, _) = form_urlencoded::parse(segment.as_bytes()).next()?;
            let key = key.into_owned();
            (!is_tracking_param(&key)).then_some((key, segment))
        })
        .collect();

    segments.sort();
    segments
        .into_iter()
        .map(|(_, segment)| segment)
        .collect::<Vec<_>>()
        .join("&")
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_and_www_kept() {
        let result = normalize_url("http://www.example.com/page", QueryPolicy::Preserve).unwrap();
        assert_eq!(result.as_str(), "http://www.example.com/page");
    }

    #[test]
    fn test_port_kept() {
        let result = normalize_url("http://127.0.0.1:8080/a.pdf", QueryPolicy::Preserve).unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/a.pdf");
    }

    #[test]
    fn test_remove_fragment() {
        let result =
            normalize_url("https://example.com/doc.pdf#page=4", QueryPolicy::Preserve).unwrap();
        assert_eq!(result.as_str(), "https://example.com/doc.pdf");
    }

    #[test]
    fn test_preserve_sorts_and_drops_tracking() {
        let result = normalize_url(
            "https://example.com/file.pdf?b=2&utm_medium=email&a=1&fbclid=x",
            QueryPolicy::Preserve,
        )
        .unwrap();
        assert_eq!(result.as_str(), "https://example.com/file.pdf?a=1&b=2");
    }

    #[test]
    fn test_preserve_removes_empty_query() {
        let result =
            normalize_url("https://example.com/file.pdf?utm_source=x", QueryPolicy::Preserve)
                .unwrap();
        assert_eq!(result.as_str(), "https://example.com/file.pdf");
    }

    #[test]
    fn test_preserve_keeps_segments_as_written() {
        let result = normalize_url(
            "https://example.com/a.pdf?download&name=Circular%20001&utm_source=x",
            QueryPolicy::Preserve,
        )
        .unwrap();
        assert_eq!(
            result.as_str(),
            "https://example.com/a.pdf?download&name=Circular%20001"
        );
    }

    #[test]
    fn test_strip_removes_query() {
        let result =
            normalize_url("https://example.com/file.pdf?version=3", QueryPolicy::Strip).unwrap();
        assert_eq!(result.as_str(), "https://example.com/file.pdf");
    }

    #[test]
    fn test_dot_segments_and_double_slashes() {
        let result =
            normalize_url("https://example.com//a/../b//./c.pdf", QueryPolicy::Preserve).unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c.pdf");
    }

    #[test]
    fn test_lowercase_host_keeps_path_case() {
        let result = normalize_url("https://EXAMPLE.COM/Docs/A.pdf", QueryPolicy::Preserve).unwrap();
        assert_eq!(result.as_str(), "https://example.com/Docs/A.pdf");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/a.pdf", QueryPolicy::Preserve);
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url", QueryPolicy::Strip).is_err());
    }

    #[test]
    fn test_query_policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: QueryPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"strip\"").unwrap();
        assert_eq!(w.policy, QueryPolicy::Strip);
    }
}
