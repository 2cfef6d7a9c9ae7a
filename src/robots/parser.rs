//! Robots.txt parser implementation
//!
//! Allow/disallow matching is delegated to the robotstxt crate (Google's
//! matcher). Groups, crawl-delay and sitemaps are parsed here because the
//! matcher does not expose them.

use chrono::{DateTime, Duration, Utc};
use robotstxt::DefaultMatcher;
use std::time::Duration as StdDuration;

/// One `User-agent` group of a robots.txt file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsGroup {
    /// Lowercased agent tokens the group applies to (`*` for the wildcard group)
    pub agents: Vec<String>,
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    /// Crawl-delay in seconds
    pub crawl_delay: Option<f64>,
}

impl RobotsGroup {
    fn matches_agent(&self, agent: &str) -> bool {
        self.agents.iter().any(|a| a == agent)
    }

    fn is_wildcard(&self) -> bool {
        self.agents.iter().any(|a| a == "*")
    }
}

/// Parsed robots.txt policy for one domain
///
/// Immutable once built; it is replaced wholesale when its TTL expires.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    /// Raw robots.txt content (empty means allow all)
    content: String,
    /// Whether to allow all without consulting the matcher
    allow_all: bool,
    groups: Vec<RobotsGroup>,
    sitemaps: Vec<String>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RobotsPolicy {
    /// Parses raw robots.txt content
    ///
    /// # Arguments
    ///
    /// * `content` - The raw robots.txt file content
    /// * `fetched_at` - When the file was fetched
    /// * `ttl` - How long the policy stays valid
    pub fn parse(content: &str, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        let (groups, sitemaps) = parse_groups(content);
        Self {
            content: content.to_string(),
            allow_all: false,
            groups,
            sitemaps,
            fetched_at,
            expires_at: fetched_at + ttl,
        }
    }

    /// Creates a permissive policy that allows everything with no crawl-delay
    ///
    /// This is used when robots.txt is missing or cannot be fetched.
    pub fn allow_all(fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            content: String::new(),
            allow_all: true,
            groups: Vec::new(),
            sitemaps: Vec::new(),
            fetched_at,
            expires_at: fetched_at + ttl,
        }
    }

    /// Returns the raw robots.txt content
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn groups(&self) -> &[RobotsGroup] {
        &self.groups
    }

    /// Sitemap URLs listed anywhere in the file
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Returns true once the policy's TTL has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Checks if a URL is allowed for the given robots product token
    ///
    /// # Arguments
    ///
    /// * `url` - The absolute URL to check
    /// * `agent` - The product token (e.g. "LanternBot")
    ///
    /// # Returns
    ///
    /// * `true` - If the URL is allowed
    /// * `false` - If the URL is disallowed
    pub fn is_allowed(&self, url: &str, agent: &str) -> bool {
        if self.allow_all || self.content.trim().is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, agent, url)
    }

    /// Gets the crawl delay that applies to an agent
    ///
    /// The agent's own group wins; otherwise the wildcard group applies.
    pub fn crawl_delay(&self, agent: &str) -> Option<StdDuration> {
        let agent = agent.to_ascii_lowercase();
        let specific = self
            .groups
            .iter()
            .filter(|g| g.matches_agent(&agent))
            .find_map(|g| g.crawl_delay);
        let seconds = specific.or_else(|| {
            self.groups
                .iter()
                .filter(|g| g.is_wildcard())
                .find_map(|g| g.crawl_delay)
        })?;

        if seconds.is_finite() && seconds > 0.0 {
            Some(StdDuration::from_secs_f64(seconds))
        } else {
            None
        }
    }

    /// Crawl delay in milliseconds, 0 when none applies
    pub fn crawl_delay_ms(&self, agent: &str) -> u64 {
        self.crawl_delay(agent)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Splits robots.txt content into user-agent groups and sitemap URLs
///
/// Consecutive `User-agent` lines share one group; the first rule line closes
/// the agent list so the next `User-agent` starts a new group.
fn parse_groups(content: &str) -> (Vec<RobotsGroup>, Vec<String>) {
    let mut groups: Vec<RobotsGroup> = Vec::new();
    let mut sitemaps = Vec::new();
    let mut current: Option<RobotsGroup> = None;
    let mut in_agent_list = false;

    for line in content.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !in_agent_list {
                    if let Some(group) = current.take() {
                        groups.push(group);
                    }
                    current = Some(RobotsGroup::default());
                    in_agent_list = true;
                }
                if let Some(group) = current.as_mut() {
                    group.agents.push(value.to_ascii_lowercase());
                }
            }
            "allow" | "disallow" | "crawl-delay" => {
                in_agent_list = false;
                let Some(group) = current.as_mut() else {
                    // Rules before any User-agent line belong to no group
                    continue;
                };
                match key.as_str() {
                    "allow" => group.allow.push(value.to_string()),
                    "disallow" => {
                        if !value.is_empty() {
                            group.disallow.push(value.to_string());
                        }
                    }
                    _ => {
                        if let Ok(delay) = value.parse::<f64>() {
                            group.crawl_delay = Some(delay);
                        }
                    }
                }
            }
            "sitemap" => {
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    if let Some(group) = current {
        groups.push(group);
    }

    (groups, sitemaps)
}
