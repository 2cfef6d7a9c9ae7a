//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Manual redirect handling with loop detection
//! - Per-job headers and credentials, scoped to the start host
//! - Content-type allowlist and response size enforcement
//! - Error classification (retryable vs terminal)

use crate::config::{AuthConfig, CrawlerConfig, JobConfig, UserAgentConfig};
use crate::crawler::extractor::RawResponse;
use crate::url::domain_key;
use crate::CrawlError;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, RequestBuilder, Response, StatusCode};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Why a fetch produced no usable response
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("response exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("more than {0} redirects")]
    RedirectLimit(u32),

    #[error("redirect loop at {0}")]
    RedirectLoop(String),

    #[error("invalid redirect target: {0}")]
    InvalidRedirect(String),
}

impl FetchError {
    /// Whether the same request may succeed later
    ///
    /// | Condition | Retryable |
    /// |-----------|-----------|
    /// | Timeout | yes |
    /// | Connection/network error | yes |
    /// | HTTP 5xx | yes |
    /// | HTTP 429 | yes |
    /// | Other HTTP 4xx | no |
    /// | Unsupported content type | no |
    /// | Response too large | no |
    /// | Redirect loop/limit/invalid | no |
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) | FetchError::RateLimited { .. } => true,
            FetchError::HttpStatus(status) => *status >= 500,
            _ => false,
        }
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

/// Builds the page-fetching HTTP client
///
/// Redirects are disabled so the fetcher can follow them itself.
///
/// # Example
///
/// ```
/// use lantern_crawl::config::{CrawlerConfig, UserAgentConfig};
/// use lantern_crawl::crawler::build_http_client;
///
/// let user_agent = UserAgentConfig {
///     crawler_name: "LanternBot".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&user_agent, &CrawlerConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    config: &CrawlerConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_millis(config.fetch_timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .redirect(Policy::none()) // Handle redirects manually
        .gzip(true)
        .brotli(true)
        .build()
}

/// Builds the client used for robots.txt, which follows a few redirects itself
pub fn build_robots_client(
    user_agent: &UserAgentConfig,
    config: &CrawlerConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(Duration::from_millis(config.fetch_timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .redirect(Policy::limited(5))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Returns true if `mime` is accepted by the allowlist
///
/// Entries may be exact (`text/html`), a family (`text/*`) or `*/*`.
pub fn content_type_allowed(allowlist: &[String], mime: &str) -> bool {
    let mime = mime.to_ascii_lowercase();
    allowlist.iter().any(|allowed| {
        let allowed = allowed.trim().to_ascii_lowercase();
        match allowed.strip_suffix("/*") {
            Some("*") => true,
            Some(family) => mime
                .split_once('/')
                .is_some_and(|(mime_family, _)| mime_family == family),
            None => allowed == mime,
        }
    })
}

/// Per-job request settings
#[derive(Debug, Clone)]
pub struct FetchProfile {
    /// `host[:port]` that receives headers and credentials
    credential_host: Option<String>,
    headers: BTreeMap<String, String>,
    auth: Option<AuthConfig>,
    content_types: Vec<String>,
}

impl FetchProfile {
    pub fn from_job(config: &JobConfig) -> Result<Self, CrawlError> {
        let start = Url::parse(&config.start_url)?;
        Ok(Self {
            credential_host: domain_key(&start),
            headers: config.headers.clone(),
            auth: config.auth.clone(),
            content_types: config.content_types.clone(),
        })
    }

    /// Whether custom headers and auth go to `url`
    pub fn sends_credentials_to(&self, url: &Url) -> bool {
        match (&self.credential_host, domain_key(url)) {
            (Some(host), Some(target)) => *host == target,
            _ => false,
        }
    }

    fn apply(&self, url: &Url, mut request: RequestBuilder) -> RequestBuilder {
        if !self.sends_credentials_to(url) {
            return request;
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        match &self.auth {
            Some(AuthConfig::Basic { username, password }) => {
                request.basic_auth(username, password.as_ref())
            }
            Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
            None => request,
        }
    }

    fn accepts(&self, content_type: Option<&str>) -> bool {
        // Servers that omit Content-Type are assumed to serve HTML
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .unwrap_or("text/html");
        content_type_allowed(&self.content_types, mime)
    }
}

/// Fetches pages with manual redirects and response limits
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_redirects: u32,
    max_response_bytes: u64,
}

impl Fetcher {
    pub fn new(client: Client, config: &CrawlerConfig) -> Self {
        Self {
            client,
            max_redirects: config.max_redirects,
            max_response_bytes: config.max_response_bytes,
        }
    }

    /// Fetches a URL
    ///
    /// # Request Flow
    ///
    /// 1. Send GET, with the job's headers/auth if the target is the start host
    /// 2. On 3xx, resolve `Location` and repeat (at most `max_redirects` hops;
    ///    revisiting a URL is a loop)
    /// 3. Map 429 and other non-2xx statuses to errors
    /// 4. Check Content-Type against the job's allowlist
    /// 5. Read the body, aborting once it exceeds `max_response_bytes`
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to fetch
    /// * `profile` - The job's request settings
    pub async fn fetch(&self, url: &Url, profile: &FetchProfile) -> Result<RawResponse, FetchError> {
        let mut current = url.clone();
        let mut visited = HashSet::from([current.to_string()]);
        let mut hops = 0;

        loop {
            let request = profile.apply(&current, self.client.get(current.clone()));
            let response = request.send().await.map_err(FetchError::from_reqwest)?;
            let status = response.status();

            if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
                return self.read_response(url, current, response, profile).await;
            }

            if hops >= self.max_redirects {
                return Err(FetchError::RedirectLimit(self.max_redirects));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(FetchError::HttpStatus(status.as_u16()))?;
            let next = current
                .join(location)
                .map_err(|_| FetchError::InvalidRedirect(location.to_string()))?;
            if !matches!(next.scheme(), "http" | "https") {
                return Err(FetchError::InvalidRedirect(next.to_string()));
            }
            if !visited.insert(next.to_string()) {
                return Err(FetchError::RedirectLoop(next.to_string()));
            }

            tracing::debug!(from = %current, to = %next, "Following redirect");
            current = next;
            hops += 1;
        }
    }

    async fn read_response(
        &self,
        requested_url: &Url,
        final_url: Url,
        mut response: Response,
        profile: &FetchProfile,
    ) -> Result<RawResponse, FetchError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !profile.accepts(content_type.as_deref()) {
            return Err(FetchError::UnsupportedContentType(
                content_type.unwrap_or_default(),
            ));
        }

        let declared_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared_length.is_some_and(|len| len > self.max_response_bytes) {
            return Err(FetchError::TooLarge {
                limit: self.max_response_bytes,
            });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::from_reqwest)? {
            if (body.len() + chunk.len()) as u64 > self.max_response_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_response_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(RawResponse {
            requested_url: requested_url.clone(),
            final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
