//! Configuration module for the crawl engine
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use lantern_crawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("lantern.toml")).unwrap();
//! println!("Fetch timeout: {}ms", config.crawler.fetch_timeout_ms);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AuthConfig, Config, CrawlerConfig, DomainMode, Frequency, JobConfig, ScheduleConfig,
    StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate_job;
