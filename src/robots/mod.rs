//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! A missing or unreachable robots.txt never blocks a crawl: it yields a
//! permissive policy.

mod cache;
mod parser;

pub use cache::{RobotsCache, ROBOTS_TTL_HOURS};
pub use parser::{RobotsGroup, RobotsPolicy};

use chrono::{Duration, Utc};
use reqwest::Client;
use url::Url;

/// Largest robots.txt body that is parsed; the rest is ignored
pub const MAX_ROBOTS_BYTES: usize = 500 * 1024;

/// Returns the robots.txt URL for the origin serving `url`
///
/// # Examples
///
/// ```
/// use lantern_crawl::robots::robots_url;
/// use url::Url;
///
/// let url = Url::parse("http://127.0.0.1:8080/docs/page?x=1").unwrap();
/// assert_eq!(robots_url(&url).unwrap().as_str(), "http://127.0.0.1:8080/robots.txt");
/// ```
pub fn robots_url(url: &Url) -> Option<Url> {
    let mut robots = url.clone();
    if robots.host_str().is_none() {
        return None;
    }
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}

/// Fetches and parses robots.txt for the origin serving `url`
///
/// # Arguments
///
/// * `client` - HTTP client carrying the crawler's User-Agent
/// * `url` - Any URL on the target origin
/// * `ttl` - Lifetime of the resulting policy
///
/// # Returns
///
/// The parsed policy, or a permissive one when the file is missing,
/// the server errors, or the request fails.
pub async fn fetch_robots(client: &Client, url: &Url, ttl: Duration) -> RobotsPolicy {
    let fetched_at = Utc::now();
    let Some(robots) = robots_url(url) else {
        return RobotsPolicy::allow_all(fetched_at, ttl);
    };

    tracing::debug!(url = %robots, "Fetching robots.txt");

    let response = match client.get(robots.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %robots, error = %e, "robots.txt fetch failed, allowing all");
            return RobotsPolicy::allow_all(fetched_at, ttl);
        }
    };

    let status = response.status();
    if !status.is_success() {
        tracing::debug!(url = %robots, status = status.as_u16(), "No usable robots.txt, allowing all");
        return RobotsPolicy::allow_all(fetched_at, ttl);
    }

    match response.bytes().await {
        Ok(body) => {
            let body = &body[..body.len().min(MAX_ROBOTS_BYTES)];
            RobotsPolicy::parse(&String::from_utf8_lossy(body), fetched_at, ttl)
        }
        Err(e) => {
            tracing::warn!(url = %robots, error = %e, "robots.txt body unreadable, allowing all");
            RobotsPolicy::allow_all(fetched_at, ttl)
        }
    }
}
