//! URL handling module
//!
//! This module provides URL normalization, domain extraction, domain-restriction
//! policies, include/exclude pattern filtering, and the per-job [`CrawlScope`]
//! that combines them into a single admission check.

mod domain;
mod matcher;
mod normalize;

use crate::config::{DomainMode, JobConfig};
use crate::CrawlError;
use thiserror::Error;
use url::Url;

// Re-export main functions
pub use domain::{domain_key, extract_domain, strip_www};
pub use matcher::{matches_wildcard, UrlFilter};
pub use normalize::{normalize_url, UrlNormalizer, DEFAULT_TRACKING_PARAMS};

/// Why a URL was not admitted into a job's frontier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("depth {depth} exceeds max depth {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    #[error("excluded by URL patterns")]
    PatternExcluded,

    #[error("domain {0} excluded by domain policy")]
    DomainExcluded(String),
}

/// Domain-restriction policy derived from a job's start URL
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    mode: DomainMode,
    root: String,
}

impl DomainPolicy {
    /// Builds the policy for a start URL
    ///
    /// The root is the start host without a leading `www.`, so
    /// `www.example.com` and `example.com` count as the same site.
    pub fn new(mode: DomainMode, start: &Url) -> Result<Self, crate::UrlError> {
        let host = extract_domain(start).ok_or(crate::UrlError::MissingDomain)?;
        Ok(Self {
            mode,
            root: strip_www(&host).to_string(),
        })
    }

    /// Returns true if links into `host` may be followed
    pub fn permits(&self, host: &str) -> bool {
        match self.mode {
            DomainMode::Any => true,
            DomainMode::Same => strip_www(host) == self.root,
            DomainMode::Subdomains => matches_wildcard(&format!("*.{}", self.root), host),
        }
    }
}

/// A URL that passed every admission check for a job
#[derive(Debug, Clone)]
pub struct AdmittedUrl {
    /// The resolved URL that will be requested
    pub url: Url,
    /// The normalized dedup key
    pub normalized: Url,
    /// Politeness/robots key (host plus non-default port)
    pub domain: String,
}

/// The compiled admission rules for one job
///
/// Combines depth limit, domain policy and include/exclude patterns. Built
/// once per job and shared by the scheduler and its fetch tasks.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    job_id: i64,
    max_depth: u32,
    filter: UrlFilter,
    domains: DomainPolicy,
    normalizer: UrlNormalizer,
}

impl CrawlScope {
    /// Compiles the scope for a job definition
    pub fn new(
        job_id: i64,
        config: &JobConfig,
        normalizer: UrlNormalizer,
    ) -> Result<Self, CrawlError> {
        let start = normalizer.resolve(&config.start_url, None)?;
        Ok(Self {
            job_id,
            max_depth: config.max_depth,
            filter: UrlFilter::from_patterns(&config.include_patterns, &config.exclude_patterns)?,
            domains: DomainPolicy::new(config.domain_mode, &start)?,
            normalizer,
        })
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn normalizer(&self) -> &UrlNormalizer {
        &self.normalizer
    }

    /// Runs every admission check for a discovered URL
    ///
    /// Checks run cheapest first: depth, URL validity, domain policy, patterns.
    /// Patterns are matched against the normalized URL.
    pub fn admit(
        &self,
        raw: &str,
        base: Option<&Url>,
        depth: u32,
    ) -> Result<AdmittedUrl, RejectReason> {
        if depth > self.max_depth {
            return Err(RejectReason::DepthExceeded {
                depth,
                max_depth: self.max_depth,
            });
        }

        let url = self
            .normalizer
            .resolve(raw, base)
            .map_err(|e| RejectReason::InvalidUrl(e.to_string()))?;
        let normalized = self
            .normalizer
            .normalize(raw, base)
            .map_err(|e| RejectReason::InvalidUrl(e.to_string()))?;

        let host = extract_domain(&normalized)
            .ok_or_else(|| RejectReason::InvalidUrl("missing host".to_string()))?;
        if !self.domains.permits(&host) {
            return Err(RejectReason::DomainExcluded(host));
        }

        if !self.filter.allows(normalized.as_str()) {
            return Err(RejectReason::PatternExcluded);
        }

        let domain = domain_key(&normalized)
            .ok_or_else(|| RejectReason::InvalidUrl("missing host".to_string()))?;

        Ok(AdmittedUrl {
            url,
            normalized,
            domain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_for(config: &JobConfig) -> CrawlScope {
        CrawlScope::new(1, config, UrlNormalizer::default()).unwrap()
    }

    #[test]
    fn test_same_domain_policy() {
        let start = Url::parse("https://www.example.com/").unwrap();
        let policy = DomainPolicy::new(DomainMode::Same, &start).unwrap();
        assert!(policy.permits("example.com"));
        assert!(policy.permits("www.example.com"));
        assert!(!policy.permits("blog.example.com"));
        assert!(!policy.permits("other.com"));
    }

    #[test]
    fn test_subdomain_policy() {
        let start = Url::parse("https://example.com/").unwrap();
        let policy = DomainPolicy::new(DomainMode::Subdomains, &start).unwrap();
        assert!(policy.permits("example.com"));
        assert!(policy.permits("docs.example.com"));
        assert!(policy.permits("a.b.example.com"));
        assert!(!policy.permits("notexample.com"));
    }

    #[test]
    fn test_any_domain_policy() {
        let start = Url::parse("https://example.com/").unwrap();
        let policy = DomainPolicy::new(DomainMode::Any, &start).unwrap();
        assert!(policy.permits("anything.org"));
    }

    #[test]
    fn test_admit_resolves_and_normalizes() {
        let config = JobConfig::new("https://docs.example.com/");
        let scope = scope_for(&config);
        let base = Url::parse("https://docs.example.com/guide/").unwrap();

        let admitted = scope.admit("setup/?b=1&a=2#x", Some(&base), 1).unwrap();
        assert_eq!(admitted.url.as_str(), "https://docs.example.com/guide/setup/?b=1&a=2#x");
        assert_eq!(
            admitted.normalized.as_str(),
            "https://docs.example.com/guide/setup?a=2&b=1"
        );
        assert_eq!(admitted.domain, "docs.example.com");
    }

    #[test]
    fn test_admit_depth_bound() {
        let mut config = JobConfig::new("https://example.com/");
        config.max_depth = 2;
        let scope = scope_for(&config);

        assert!(scope.admit("https://example.com/a", None, 2).is_ok());
        assert_eq!(
            scope.admit("https://example.com/a", None, 3).unwrap_err(),
            RejectReason::DepthExceeded {
                depth: 3,
                max_depth: 2
            }
        );
    }

    #[test]
    fn test_admit_domain_and_patterns() {
        let mut config = JobConfig::new("https://example.com/");
        config.exclude_patterns = vec!["/private/".to_string()];
        let scope = scope_for(&config);

        assert!(matches!(
            scope.admit("https://other.com/", None, 1),
            Err(RejectReason::DomainExcluded(_))
        ));
        assert_eq!(
            scope.admit("https://example.com/private/x", None, 1).unwrap_err(),
            RejectReason::PatternExcluded
        );
        assert!(matches!(
            scope.admit("javascript:void(0)", None, 1),
            Err(RejectReason::InvalidUrl(_))
        ));
    }
}
