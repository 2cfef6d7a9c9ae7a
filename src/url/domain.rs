use url::Url;

/// Extracts the domain from a URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// If the URL has no host (which shouldn't happen for valid HTTP(S) URLs), it returns None.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use lantern_crawl::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("https://sub.example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("sub.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the politeness/robots key for a URL: the host plus any non-default port
///
/// Two servers on the same host but different ports serve different robots.txt
/// files, so they are tracked separately.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use lantern_crawl::url::domain_key;
///
/// let url = Url::parse("http://127.0.0.1:8080/a").unwrap();
/// assert_eq!(domain_key(&url), Some("127.0.0.1:8080".to_string()));
///
/// let url = Url::parse("https://Example.com:443/a").unwrap();
/// assert_eq!(domain_key(&url), Some("example.com".to_string()));
/// ```
pub fn domain_key(url: &Url) -> Option<String> {
    let host = extract_domain(url)?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Strips a leading `www.` label
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple_domain() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_nested_subdomain() {
        let url = Url::parse("https://api.v2.example.com/endpoint").unwrap();
        assert_eq!(extract_domain(&url), Some("api.v2.example.com".to_string()));
    }

    #[test]
    fn test_extract_ignores_port() {
        let url = Url::parse("https://example.com:8080/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_ip_address() {
        let url = Url::parse("http://192.168.1.1/page").unwrap();
        assert_eq!(extract_domain(&url), Some("192.168.1.1".to_string()));
    }

    #[test]
    fn test_domain_key_keeps_explicit_port() {
        let url = Url::parse("http://localhost:3000/").unwrap();
        assert_eq!(domain_key(&url), Some("localhost:3000".to_string()));
    }

    #[test]
    fn test_strip_www() {
        assert_eq!(strip_www("www.example.com"), "example.com");
        assert_eq!(strip_www("example.com"), "example.com");
        assert_eq!(strip_www("wwwexample.com"), "wwwexample.com");
    }
}
