//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The per-job URL frontier with priorities, retries and backoff
//! - HTTP fetching with redirect, size and content-type limits
//! - Content extraction and link discovery
//! - The per-job scheduler and its control state machine
//! - Overall crawl coordination

mod coordinator;
mod extractor;
mod fetcher;
mod frontier;
mod scheduler;

pub use coordinator::Coordinator;
pub use extractor::{
    content_hash, extract, ExtractedLink, ExtractedPage, ExtractionError, RawResponse,
};
pub use fetcher::{
    build_http_client, build_robots_client, content_type_allowed, FetchError, FetchProfile,
    Fetcher,
};
pub use frontier::{
    link_priority, EnqueueOutcome, EntryOutcome, Frontier, RetryPolicy, SEED_PRIORITY,
};
pub use scheduler::{
    fail_job, ControlSignal, FailureTracker, FetchContext, Scheduler, ROBOTS_SKIP_REASON,
};
