use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration structure for the crawl engine
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

/// Engine-wide crawler behavior configuration
///
/// These settings apply to every job; per-job limits live in [`JobConfig`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Total timeout for a single fetch (milliseconds)
    pub fetch_timeout_ms: u64,

    /// Connection establishment timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Maximum number of redirect hops followed per fetch
    pub max_redirects: u32,

    /// Maximum accepted response body size in bytes
    pub max_response_bytes: u64,

    /// Attempts per frontier entry before it becomes terminally failed
    pub max_attempts: u32,

    /// First retry delay; doubles with every further failed attempt (milliseconds)
    pub backoff_base_ms: u64,

    /// Upper bound for a single retry delay (milliseconds)
    pub max_backoff_ms: u64,

    /// Number of most recent fetch outcomes considered for the failure rate
    pub failure_window: usize,

    /// Failure rate over a full window that flips a job to failed
    pub failure_rate_threshold: f64,

    /// Consecutive failed fetches that stop a job immediately
    pub max_consecutive_failures: u32,

    /// Time in-flight fetches get to finish after a cancel (milliseconds)
    pub cancel_grace_ms: u64,

    /// Upper bound on how long the scheduler sleeps between readiness checks (milliseconds)
    pub scheduling_tick_ms: u64,

    /// Trailing window used for the pages/minute speed (seconds)
    pub status_window_secs: u64,

    /// Query parameters removed during URL normalization
    pub tracking_params: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_redirects: 10,
            max_response_bytes: 5 * 1024 * 1024,
            max_attempts: 5,
            backoff_base_ms: 1_000,
            max_backoff_ms: 300_000,
            failure_window: 20,
            failure_rate_threshold: 0.5,
            max_consecutive_failures: 10,
            cancel_grace_ms: 5_000,
            scheduling_tick_ms: 250,
            status_window_secs: 300,
            tracking_params: crate::url::DEFAULT_TRACKING_PARAMS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also used as the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Which domains a job may follow links into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainMode {
    /// Only the start URL's host
    #[default]
    Same,
    /// The start URL's host and any of its subdomains
    Subdomains,
    /// Any host
    Any,
}

/// Credentials attached to requests against the start URL's host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
    Bearer {
        token: String,
    },
}

/// How often a recurring job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// Recurring schedule for a job
///
/// All fields are interpreted in UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScheduleConfig {
    pub frequency: Frequency,

    /// Hour of day (0-23)
    #[serde(default)]
    pub hour: u32,

    /// Day of week for weekly schedules (0 = Sunday .. 6 = Saturday)
    #[serde(default)]
    pub day_of_week: Option<u32>,

    /// Day of month for monthly schedules (1-31, clamped to the month length)
    #[serde(default)]
    pub day_of_month: Option<u32>,
}

/// Definition of one crawl job
///
/// Stored alongside the job record, so it round-trips through JSON as well as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    /// Optional stable name; scheduled jobs are looked up by it
    #[serde(default)]
    pub name: Option<String>,

    /// Owning user or workspace
    #[serde(default = "default_owner")]
    pub owner: String,

    pub start_url: String,

    /// Regexes; when non-empty a URL must match at least one
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Regexes; a URL matching any of them is never enqueued
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(default)]
    pub domain_mode: DomainMode,

    /// Accepted MIME types; `type/*` accepts a whole family
    #[serde(default = "default_content_types")]
    pub content_types: Vec<String>,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Minimum spacing between requests to one domain (milliseconds)
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

impl JobConfig {
    /// Creates a job definition with default limits for the given start URL
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            name: None,
            owner: default_owner(),
            start_url: start_url.into(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            domain_mode: DomainMode::default(),
            content_types: default_content_types(),
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            request_delay_ms: default_request_delay_ms(),
            max_concurrent: default_max_concurrent(),
            headers: BTreeMap::new(),
            auth: None,
            schedule: None,
        }
    }
}

fn default_owner() -> String {
    "default".to_string()
}

fn default_content_types() -> Vec<String> {
    vec!["text/html".to_string()]
}

fn default_max_pages() -> u32 {
    100
}

fn default_max_depth() -> u32 {
    3
}

fn default_request_delay_ms() -> u64 {
    1_000
}

fn default_max_concurrent() -> u32 {
    5
}
