//! Lantern: a polite crawl orchestration engine
//!
//! This crate takes a starting URL and a set of crawl policies and discovers,
//! fetches, filters and records a bounded set of web pages. It respects
//! robots.txt and per-domain politeness delays, retries transient failures
//! with exponential backoff, supports pause/resume/cancel, and exposes a live
//! status projection for dashboards.

pub mod config;
pub mod crawler;
pub mod output;
pub mod robots;
pub mod schedule;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for crawl engine operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Invalid job transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: i64,
        from: state::JobStatus,
        to: state::JobStatus,
    },

    #[error("Scheduler task for job {job_id} failed: {message}")]
    SchedulerTask { job_id: i64, message: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for crawl engine operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{Config, JobConfig};
pub use crawler::Coordinator;
pub use output::{compute_status, JobStatusReport};
pub use state::{EntryStatus, JobStatus};
pub use storage::{CrawlJob, CrawledPage, FrontierEntry};
pub use url::{extract_domain, normalize_url, UrlNormalizer};
