use crate::UrlError;
use url::Url;

/// Tracking query parameters removed during normalization by default
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "ref",
];

/// Canonicalizes URLs so equivalent forms compare equal
///
/// The normalized form is the frontier's dedup key. Normalization is a pure
/// function of its inputs: no I/O, no global state.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    tracking_params: Vec<String>,
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKING_PARAMS.iter().map(|p| p.to_string()).collect())
    }
}

impl UrlNormalizer {
    /// Creates a normalizer that strips the given tracking parameters
    ///
    /// Any parameter starting with `utm_` is always stripped.
    pub fn new(tracking_params: Vec<String>) -> Self {
        Self {
            tracking_params: tracking_params
                .into_iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Resolves `raw` against `base` without canonicalizing it
    ///
    /// This is the URL that is actually requested; [`normalize`](Self::normalize)
    /// produces the dedup key for it.
    pub fn resolve(&self, raw: &str, base: Option<&Url>) -> Result<Url, UrlError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(UrlError::Malformed("empty URL".to_string()));
        }

        let url = match base {
            Some(base) => base.join(raw),
            None => Url::parse(raw),
        }
        .map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UrlError::InvalidScheme(format!(
                "Only HTTP and HTTPS schemes are supported, got: {}",
                url.scheme()
            )));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(UrlError::MissingDomain);
        }

        Ok(url)
    }

    /// Normalizes a URL according to the crawl dedup rules
    ///
    /// # Normalization Steps
    ///
    /// 1. Resolve against `base` (relative links) or parse as absolute
    /// 2. Reject non-HTTP(S) schemes and URLs without a host
    /// 3. Lowercase scheme and host, drop the default port
    /// 4. Normalize path: collapse duplicate slashes, remove dot segments,
    ///    remove a trailing slash (except for root)
    /// 5. Remove the fragment
    /// 6. Remove tracking query parameters
    /// 7. Sort remaining query parameters by key (stable for repeated keys)
    /// 8. Remove an empty query string
    ///
    /// # Examples
    ///
    /// ```
    /// use lantern_crawl::url::UrlNormalizer;
    ///
    /// let normalizer = UrlNormalizer::default();
    /// let url = normalizer
    ///     .normalize("HTTP://Example.COM:80/docs/?b=2&a=1&utm_source=x#intro", None)
    ///     .unwrap();
    /// assert_eq!(url.as_str(), "http://example.com/docs?a=1&b=2");
    /// ```
    pub fn normalize(&self, raw: &str, base: Option<&Url>) -> Result<Url, UrlError> {
        let mut url = self.resolve(raw, base)?;

        // The url crate lowercases special-scheme hosts and drops default
        // ports on parse; re-apply explicitly so the invariant is local.
        if let Some(host) = url.host_str() {
            let lowered = host.to_lowercase();
            if lowered != host {
                url.set_host(Some(&lowered))
                    .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
            }
        }
        if url.port().is_some() && url.port() == default_port(url.scheme()) {
            url.set_port(None)
                .map_err(|_| UrlError::Malformed("Failed to clear default port".to_string()))?;
        }

        let normalized_path = normalize_path(url.path());
        url.set_path(&normalized_path);

        url.set_fragment(None);

        if url.query().is_some() {
            let params = self.filter_and_sort_query_params(&url);
            if params.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(params);
            }
        }

        Ok(url)
    }

    /// Filters out tracking parameters and sorts remaining query parameters
    fn filter_and_sort_query_params(&self, url: &Url) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !key.is_empty() && !self.is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        params.sort_by(|a, b| a.0.cmp(&b.0));
        params
    }

    /// Checks if a query parameter is a tracking parameter
    fn is_tracking_param(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        key.starts_with("utm_") || self.tracking_params.iter().any(|p| *p == key)
    }
}

/// Normalizes a URL with the default tracking parameter set
///
/// # Examples
///
/// ```
/// use lantern_crawl::url::normalize_url;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/guide/intro").unwrap();
/// let url = normalize_url("../api/?z=1&a=2", Some(&base)).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/api?a=2&z=1");
/// ```
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Result<Url, UrlError> {
    UrlNormalizer::default().normalize(raw, base)
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            // Empty segments come from duplicate slashes
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}
