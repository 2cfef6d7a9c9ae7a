//! Process-wide robots.txt cache
//!
//! Policies are keyed by domain (host plus any non-default port) and refreshed
//! lazily after their TTL. Each key has its own async slot, so concurrent
//! lookups for the same uncached domain wait for a single fetch.

use crate::robots::{fetch_robots, RobotsPolicy};
use crate::url::domain_key;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

/// Default lifetime of a cached policy
pub const ROBOTS_TTL_HOURS: i64 = 24;

type Slot = Arc<Mutex<Option<Arc<RobotsPolicy>>>>;

/// Shared read-through cache of robots.txt policies
pub struct RobotsCache {
    client: Client,
    ttl: Duration,
    slots: DashMap<String, Slot>,
    fetches: AtomicU64,
}

impl RobotsCache {
    /// Creates a cache with the default 24 hour TTL
    pub fn new(client: Client) -> Self {
        Self::with_ttl(client, Duration::hours(ROBOTS_TTL_HOURS))
    }

    pub fn with_ttl(client: Client, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            slots: DashMap::new(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Gets the policy for the domain serving `url`
    ///
    /// On a miss or after expiry this fetches `/robots.txt` once, while other
    /// callers for the same domain wait on the slot. Fetch failures produce a
    /// permissive policy, which is cached like any other.
    pub async fn get_policy(&self, url: &Url) -> Arc<RobotsPolicy> {
        let Some(key) = domain_key(url) else {
            return Arc::new(RobotsPolicy::allow_all(Utc::now(), self.ttl));
        };

        let slot: Slot = self.slots.entry(key.clone()).or_default().clone();
        let mut cached = slot.lock().await;

        if let Some(policy) = cached.as_ref() {
            if !policy.is_expired(Utc::now()) {
                tracing::trace!(domain = %key, "robots.txt cache hit");
                return Arc::clone(policy);
            }
            tracing::debug!(domain = %key, "robots.txt expired, refetching");
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let policy = Arc::new(fetch_robots(&self.client, url, self.ttl).await);
        *cached = Some(Arc::clone(&policy));
        policy
    }

    /// Returns the cached policy for a domain key without fetching
    pub fn peek(&self, key: &str) -> Option<Arc<RobotsPolicy>> {
        let slot = self.slots.get(key)?.clone();
        let cached = slot.try_lock().ok()?;
        cached.clone()
    }

    /// Number of robots.txt fetches performed so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with_robots(status: u16, body: &str, expected: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .set_delay(StdDuration::from_millis(50)),
            )
            .expect(expected)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_concurrent_lookups_fetch_once() {
        let server = server_with_robots(200, "User-agent: *\nDisallow: /private/", 1).await;
        let cache = RobotsCache::new(Client::new());
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();

        let policies =
            futures::future::join_all((0..8).map(|_| cache.get_policy(&url))).await;

        assert_eq!(cache.fetch_count(), 1);
        for policy in policies {
            assert!(!policy.is_allowed(&format!("{}/private/x", server.uri()), "LanternBot"));
        }
    }

    #[tokio::test]
    async fn test_missing_robots_is_permissive() {
        let server = server_with_robots(404, "not found", 1).await;
        let cache = RobotsCache::new(Client::new());
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();

        let policy = cache.get_policy(&url).await;
        assert!(policy.is_allowed(&format!("{}/anything", server.uri()), "LanternBot"));
        assert_eq!(policy.crawl_delay_ms("LanternBot"), 0);

        // The permissive policy is cached too
        cache.get_policy(&url).await;
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_permissive() {
        let server = server_with_robots(503, "", 1).await;
        let cache = RobotsCache::new(Client::new());
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();

        let policy = cache.get_policy(&url).await;
        assert!(policy.is_allowed(&format!("{}/x", server.uri()), "LanternBot"));
    }

    #[tokio::test]
    async fn test_expired_policy_is_refetched() {
        let server = server_with_robots(200, "User-agent: *\nCrawl-delay: 2", 2).await;
        let cache = RobotsCache::with_ttl(Client::new(), Duration::zero());
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();

        let first = cache.get_policy(&url).await;
        let second = cache.get_policy(&url).await;
        assert_eq!(first.crawl_delay_ms("LanternBot"), 2_000);
        assert_eq!(second.crawl_delay_ms("LanternBot"), 2_000);
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_peek() {
        let server = server_with_robots(200, "User-agent: *\nAllow: /", 1).await;
        let cache = RobotsCache::new(Client::new());
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();
        let key = domain_key(&url).unwrap();

        assert!(cache.peek(&key).is_none());
        cache.get_policy(&url).await;
        assert!(cache.peek(&key).is_some());
    }
}
