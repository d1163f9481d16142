use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use regdoc_harvester::url::extract_domain;
///
/// let url = Url::parse("https://WWW.Adres.gov.co/normativa").unwrap();
/// assert_eq!(extract_domain(&url), Some("www.adres.gov.co".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Key under which per-site state is cached: host plus explicit port
///
/// Two servers on the same host but different ports have separate
/// robots.txt files.
pub fn site_key(url: &Url) -> Option<String> {
    let host = extract_domain(url)?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// URL of the robots.txt governing `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    url.host_str()?;
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}
