//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::config::JobConfig;
use crate::state::{EntryStatus, JobStatus};
use crate::storage::{
    CrawlJob, CrawledPage, EntryUpdate, FrontierCounts, FrontierEntry, InsertOutcome, NewEntry,
    PageCommit, ReclaimSummary,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Frontier entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all persistence operations needed by the engine. Every
/// state change that must survive a crash (claims, results, counters) is a
/// single call, so an implementation can make each one atomic.
///
/// Timestamps are passed in as strings produced by
/// [`db_timestamp`](crate::storage::db_timestamp), which keeps the backend
/// free of clock reads and makes its behaviour reproducible in tests.
pub trait Storage {
    // ===== Job Management =====

    /// Creates a new job record
    ///
    /// # Arguments
    ///
    /// * `config` - The job definition, stored as JSON
    /// * `status` - Initial status (`idle` or `queued`)
    /// * `parent_job_id` - Template job for recurring runs
    /// * `now` - Creation timestamp
    ///
    /// # Returns
    ///
    /// The ID of the newly created job
    fn create_job(
        &mut self,
        config: &JobConfig,
        status: JobStatus,
        parent_job_id: Option<i64>,
        now: &str,
    ) -> StorageResult<i64>;

    /// Gets a job by ID
    fn get_job(&self, job_id: i64) -> StorageResult<Option<CrawlJob>>;

    /// Finds the most recent top-level job with the given name
    fn find_job_by_name(&self, name: &str) -> StorageResult<Option<CrawlJob>>;

    /// Lists all jobs, oldest first
    fn list_jobs(&self) -> StorageResult<Vec<CrawlJob>>;

    /// Lists jobs whose status is one of `statuses`
    fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> StorageResult<Vec<CrawlJob>>;

    /// Replaces a job's stored definition
    fn update_job_config(&mut self, job_id: i64, config: &JobConfig, now: &str)
        -> StorageResult<()>;

    /// Moves a job to `to` if its current status is one of `from`
    ///
    /// Sets `started_at` the first time a job enters `running` and
    /// `finished_at` when it enters a terminal state.
    ///
    /// # Returns
    ///
    /// * `true` - The transition was applied
    /// * `false` - The job's status was not in `from`
    fn transition_job(
        &mut self,
        job_id: i64,
        from: &[JobStatus],
        to: JobStatus,
        now: &str,
    ) -> StorageResult<bool>;

    /// Sets or clears the next recurring run time
    fn set_next_scheduled_run(&mut self, job_id: i64, next: Option<&str>) -> StorageResult<()>;

    /// Jobs whose next scheduled run is at or before `now`
    fn due_scheduled_jobs(&self, now: &str) -> StorageResult<Vec<CrawlJob>>;

    /// Records an error on a job without changing its status
    fn record_job_error(&mut self, job_id: i64, message: &str, now: &str) -> StorageResult<()>;

    // ===== Frontier Management =====

    /// Inserts a discovered URL, deduplicating on `(job_id, normalized_url)`
    ///
    /// A duplicate of a pending entry raises its priority to the maximum of
    /// the two; duplicates of any other entry are ignored. New entries bump
    /// the job's `pages_discovered` counter.
    fn insert_discovery(
        &mut self,
        job_id: i64,
        entry: &NewEntry,
        now: &str,
    ) -> StorageResult<InsertOutcome>;

    /// Claims the next entry for a job
    ///
    /// Candidates are `pending` entries whose `next_retry_at` is unset or at
    /// or before `now`, in order of priority (highest first) then insertion
    /// (earliest first). The first candidate whose domain passes `ready` is
    /// moved to `processing` with a compare-and-swap on its status, and its
    /// attempt count is incremented.
    fn claim_next(
        &mut self,
        job_id: i64,
        now: &str,
        ready: &mut dyn FnMut(&str) -> bool,
    ) -> StorageResult<Option<FrontierEntry>>;

    /// Applies a result to a claimed entry and updates the job's counters
    ///
    /// `claim_attempt` is the attempt count returned by the claim; the update
    /// only applies while the entry is still `processing` under that claim.
    ///
    /// # Returns
    ///
    /// * `Some(status)` - The entry's new status
    /// * `None` - The claim was stale and nothing changed
    fn apply_entry_result(
        &mut self,
        entry_id: i64,
        claim_attempt: u32,
        update: &EntryUpdate,
        now: &str,
    ) -> StorageResult<Option<EntryStatus>>;

    /// Records a fetched page, completes its entry, bumps the job's counters
    /// and inserts the page's discoveries in one transaction
    ///
    /// Returns `None` and changes nothing if the claim was stale.
    fn commit_page(
        &mut self,
        entry_id: i64,
        claim_attempt: u32,
        page: &CrawledPage,
        discoveries: &[NewEntry],
        now: &str,
    ) -> StorageResult<Option<PageCommit>>;

    /// Returns `processing` entries last claimed before `cutoff` to `pending`
    ///
    /// Entries that already used `max_attempts` claims become terminally
    /// failed and are counted on the job.
    fn reclaim_stale(
        &mut self,
        job_id: i64,
        cutoff: &str,
        max_attempts: u32,
        now: &str,
    ) -> StorageResult<ReclaimSummary>;

    /// Marks every `pending` and `processing` entry of a job as skipped
    ///
    /// Discarded entries are not counted as crawled.
    fn discard_pending(&mut self, job_id: i64, reason: &str, now: &str) -> StorageResult<u64>;

    /// Gets a frontier entry by ID
    fn get_entry(&self, entry_id: i64) -> StorageResult<Option<FrontierEntry>>;

    /// Lists a job's entries, optionally filtered by status, in dequeue order
    fn list_entries(
        &self,
        job_id: i64,
        status: Option<EntryStatus>,
    ) -> StorageResult<Vec<FrontierEntry>>;

    /// Counts a job's entries by status
    fn frontier_counts(&self, job_id: i64, since: &str) -> StorageResult<FrontierCounts>;

    /// Earliest retry time among a job's pending entries
    fn next_retry_at(&self, job_id: i64) -> StorageResult<Option<String>>;

    // ===== Pages =====

    /// Gets every page recorded for a job, in crawl order
    fn get_pages(&self, job_id: i64) -> StorageResult<Vec<CrawledPage>>;
}
