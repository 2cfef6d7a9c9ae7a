//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - Job records, lifecycle transitions and counters
//! - The per-job URL frontier with compare-and-swap claims
//! - Crawled page records for the document pipeline

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::JobConfig;
use crate::state::{EntryStatus, JobStatus};
use crate::CrawlError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared by the coordinator, schedulers and their tasks
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SharedStorage)` - Successfully initialized storage
/// * `Err(CrawlError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SharedStorage, CrawlError> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Locks shared storage, mapping a poisoned lock to an error
pub fn lock(storage: &SharedStorage) -> Result<MutexGuard<'_, dyn Storage + Send + 'static>, CrawlError> {
    storage.lock().map_err(|_| CrawlError::LockPoisoned)
}

/// Formats a timestamp the way every table stores it
pub fn db_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp
pub fn parse_db_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// A crawl job record
#[derive(Debug, Clone, Serialize)]
pub struct CrawlJob {
    pub id: i64,
    /// Template this run was dispatched from, for recurring jobs
    pub parent_job_id: Option<i64>,
    pub name: Option<String>,
    pub owner: String,
    pub start_url: String,
    pub config: JobConfig,
    pub status: JobStatus,
    pub pages_discovered: u64,
    pub pages_crawled: u64,
    pub pages_successful: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    pub total_words: u64,
    pub total_links: u64,
    pub last_error: Option<String>,
    pub error_count: u64,
    pub next_scheduled_run: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: String,
}

/// One candidate URL in a job's frontier
#[derive(Debug, Clone, Serialize)]
pub struct FrontierEntry {
    pub id: i64,
    pub job_id: i64,
    pub url: String,
    /// Dedup key, unique per job
    pub normalized_url: String,
    pub domain: String,
    pub depth: u32,
    /// 0-100, higher is dequeued sooner
    pub priority: u32,
    pub parent_url: Option<String>,
    pub anchor_text: Option<String>,
    pub status: EntryStatus,
    /// Number of claims so far; also the fencing token of the current claim
    pub attempts: u32,
    pub last_attempt_at: Option<String>,
    pub next_retry_at: Option<String>,
    pub error_message: Option<String>,
    pub discovered_at: String,
    pub finished_at: Option<String>,
}

/// A newly discovered URL ready to be inserted into the frontier
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub url: String,
    pub normalized_url: String,
    pub domain: String,
    pub depth: u32,
    pub priority: u32,
    pub parent_url: Option<String>,
    pub anchor_text: Option<String>,
    /// Inserted directly as `skipped` with this reason (robots disallow)
    pub skip_reason: Option<String>,
}

/// What happened to a discovery on insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new entry was created
    Inserted(i64),
    /// An existing pending entry got a higher priority
    PriorityRaised,
    /// Already known; nothing changed
    Duplicate,
}

/// Terminal or retry update applied to a claimed entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryUpdate {
    /// Finished without a page record
    Completed,
    /// Back to pending until `next_retry_at`
    Retry { error: String, next_retry_at: String },
    /// Terminally failed
    Failed { error: String },
    /// Deliberately not fetched
    Skipped { reason: String },
}

/// Result of committing a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCommit {
    pub page_id: i64,
    pub inserted: usize,
    pub priority_raised: usize,
}

/// Stale `processing` entries handed back by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReclaimSummary {
    pub requeued: u64,
    pub failed: u64,
}

/// Live frontier counts for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrontierCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Entries completed at or after the window start passed to the query
    pub recent_completions: u64,
}

impl FrontierCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.skipped
    }
}

/// The result of one successful fetch
#[derive(Debug, Clone, Serialize)]
pub struct CrawledPage {
    /// Assigned by storage; ignored on insert
    pub id: i64,
    pub job_id: i64,
    pub entry_id: i64,
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub text_content: String,
    pub markdown: String,
    pub word_count: u64,
    pub link_count: u64,
    pub image_count: u64,
    pub code_block_count: u64,
    pub table_count: u64,
    /// Normalized outgoing links
    pub links: Vec<String>,
    pub content_hash: String,
    pub crawled_at: String,
}
