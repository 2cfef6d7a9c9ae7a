//! URL frontier
//!
//! The per-job set of URLs that are known but not yet terminally processed.
//! Admission (depth, domain, patterns), normalization and dedup happen on
//! enqueue; claims are a compare-and-swap on `pending -> processing` in
//! storage, so concurrent dequeues never hand out the same entry.

use crate::config::CrawlerConfig;
use crate::state::EntryStatus;
use crate::storage::{
    db_timestamp, lock, parse_db_timestamp, CrawledPage, EntryUpdate, FrontierCounts,
    FrontierEntry, InsertOutcome, NewEntry, PageCommit, ReclaimSummary, SharedStorage,
};
use crate::url::{CrawlScope, RejectReason};
use crate::CrawlError;
use chrono::Utc;
use std::time::Duration;
use url::Url;

/// Priority of a job's start URL
pub const SEED_PRIORITY: u32 = 100;

/// Priority of a link discovered at `depth`
///
/// Shallower pages are crawled first: 90 at depth 1, 80 at depth 2, down to
/// a floor of 10.
pub fn link_priority(depth: u32) -> u32 {
    SEED_PRIORITY - depth.saturating_mul(10).min(90)
}

/// Exponential backoff for failed entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub base: Duration,
    /// Cap on any single delay
    pub max: Duration,
    /// Attempts after which a retryable failure becomes terminal
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the next attempt after `attempts` failed attempts
    ///
    /// `base * 2^(attempts - 1)`, capped at `max`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Whether an entry with `attempts` claims has no retries left
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

/// Result of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Inserted(i64),
    /// Already pending; its priority was raised
    PriorityRaised,
    Duplicate,
    /// Not admitted by the job's scope
    Rejected(RejectReason),
}

/// How a claimed entry ended
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Completed,
    Failed {
        error: String,
        retryable: bool,
        /// Lower bound on the retry delay (e.g. from `Retry-After`)
        retry_after: Option<Duration>,
    },
    Skipped {
        reason: String,
    },
}

impl EntryOutcome {
    pub fn retryable(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            retryable: true,
            retry_after: None,
        }
    }

    pub fn terminal(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            retryable: false,
            retry_after: None,
        }
    }
}

/// The URL frontier of every job, backed by shared storage
#[derive(Clone)]
pub struct Frontier {
    storage: SharedStorage,
    retry: RetryPolicy,
}

impl Frontier {
    pub fn new(storage: SharedStorage, retry: RetryPolicy) -> Self {
        Self { storage, retry }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs admission checks and builds the row for a discovered URL
    ///
    /// Does not touch storage, so a fetch task can prepare its page's
    /// discoveries and commit them together with the page.
    pub fn prepare(
        scope: &CrawlScope,
        raw: &str,
        base: Option<&Url>,
        depth: u32,
        priority: u32,
        parent_url: Option<&str>,
        anchor_text: Option<&str>,
    ) -> Result<NewEntry, RejectReason> {
        let admitted = scope.admit(raw, base, depth)?;
        Ok(NewEntry {
            url: admitted.url.to_string(),
            normalized_url: admitted.normalized.to_string(),
            domain: admitted.domain,
            depth,
            priority: priority.min(SEED_PRIORITY),
            parent_url: parent_url.map(str::to_string),
            anchor_text: anchor_text.map(str::to_string),
            skip_reason: None,
        })
    }

    /// Adds a URL to a job's frontier
    ///
    /// A URL already known under the same normalized form is never inserted
    /// twice; a pending duplicate keeps the higher of the two priorities.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        scope: &CrawlScope,
        raw: &str,
        base: Option<&Url>,
        depth: u32,
        priority: u32,
        parent_url: Option<&str>,
        anchor_text: Option<&str>,
    ) -> Result<EnqueueOutcome, CrawlError> {
        let entry = match Self::prepare(scope, raw, base, depth, priority, parent_url, anchor_text)
        {
            Ok(entry) => entry,
            Err(reason) => {
                tracing::debug!(job_id = scope.job_id(), url = raw, %reason, "URL rejected");
                return Ok(EnqueueOutcome::Rejected(reason));
            }
        };
        self.insert(scope.job_id(), &entry)
    }

    /// Inserts an already prepared entry
    pub fn insert(&self, job_id: i64, entry: &NewEntry) -> Result<EnqueueOutcome, CrawlError> {
        let now = db_timestamp(Utc::now());
        let outcome = lock(&self.storage)?.insert_discovery(job_id, entry, &now)?;
        Ok(match outcome {
            InsertOutcome::Inserted(id) => EnqueueOutcome::Inserted(id),
            InsertOutcome::PriorityRaised => EnqueueOutcome::PriorityRaised,
            InsertOutcome::Duplicate => EnqueueOutcome::Duplicate,
        })
    }

    /// Claims the next eligible entry of a job
    ///
    /// Eligible entries are pending, past their retry time, and on a domain
    /// accepted by `ready`. Highest priority wins; ties go to the earliest
    /// discovered entry.
    pub fn dequeue_next(
        &self,
        job_id: i64,
        mut ready: impl FnMut(&str) -> bool,
    ) -> Result<Option<FrontierEntry>, CrawlError> {
        let now = db_timestamp(Utc::now());
        let entry = lock(&self.storage)?.claim_next(job_id, &now, &mut ready)?;
        Ok(entry)
    }

    /// Records how a claimed entry ended
    ///
    /// Retryable failures go back to `pending` with an exponential backoff
    /// until the entry has used `max_attempts` claims, then become `failed`.
    ///
    /// # Returns
    ///
    /// * `Some(status)` - The entry's new status
    /// * `None` - The claim was stale (reclaimed or discarded meanwhile)
    pub fn mark_result(
        &self,
        entry: &FrontierEntry,
        outcome: EntryOutcome,
    ) -> Result<Option<EntryStatus>, CrawlError> {
        let now = Utc::now();
        let update = match outcome {
            EntryOutcome::Completed => EntryUpdate::Completed,
            EntryOutcome::Skipped { reason } => EntryUpdate::Skipped { reason },
            EntryOutcome::Failed {
                error,
                retryable,
                retry_after,
            } => {
                if retryable && !self.retry.is_exhausted(entry.attempts) {
                    let delay = self
                        .retry
                        .backoff(entry.attempts)
                        .max(retry_after.unwrap_or_default());
                    let next_retry_at =
                        now + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    tracing::debug!(
                        url = %entry.url,
                        attempt = entry.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling retry"
                    );
                    EntryUpdate::Retry {
                        error,
                        next_retry_at: db_timestamp(next_retry_at),
                    }
                } else {
                    EntryUpdate::Failed { error }
                }
            }
        };

        let status = lock(&self.storage)?.apply_entry_result(
            entry.id,
            entry.attempts,
            &update,
            &db_timestamp(now),
        )?;
        if status.is_none() {
            tracing::debug!(url = %entry.url, "Ignoring result for stale claim");
        }
        Ok(status)
    }

    /// Stores a fetched page and its discoveries, completing the entry
    pub fn commit_page(
        &self,
        entry: &FrontierEntry,
        page: &CrawledPage,
        discoveries: &[NewEntry],
    ) -> Result<Option<PageCommit>, CrawlError> {
        let now = db_timestamp(Utc::now());
        let commit =
            lock(&self.storage)?.commit_page(entry.id, entry.attempts, page, discoveries, &now)?;
        Ok(commit)
    }

    /// Hands entries stuck in `processing` for longer than `older_than` back
    /// to `pending`
    pub fn reclaim_stale(
        &self,
        job_id: i64,
        older_than: Duration,
    ) -> Result<ReclaimSummary, CrawlError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        let summary = lock(&self.storage)?.reclaim_stale(
            job_id,
            &db_timestamp(cutoff),
            self.retry.max_attempts,
            &db_timestamp(now),
        )?;
        if summary.requeued > 0 || summary.failed > 0 {
            tracing::info!(
                job_id,
                requeued = summary.requeued,
                failed = summary.failed,
                "Reclaimed stale entries"
            );
        }
        Ok(summary)
    }

    /// Marks every pending and in-flight entry of a job as skipped
    pub fn discard_pending(&self, job_id: i64, reason: &str) -> Result<u64, CrawlError> {
        let now = db_timestamp(Utc::now());
        let discarded = lock(&self.storage)?.discard_pending(job_id, reason, &now)?;
        Ok(discarded)
    }

    /// Live counts, with completions over the trailing `window`
    pub fn counts(&self, job_id: i64, window: Duration) -> Result<FrontierCounts, CrawlError> {
        let since = Utc::now() - chrono::Duration::milliseconds(window.as_millis() as i64);
        let counts = lock(&self.storage)?.frontier_counts(job_id, &db_timestamp(since))?;
        Ok(counts)
    }

    /// Time until the earliest pending retry becomes eligible
    pub fn next_retry_in(&self, job_id: i64) -> Result<Option<Duration>, CrawlError> {
        let next = lock(&self.storage)?.next_retry_at(job_id)?;
        Ok(next.as_deref().and_then(parse_db_timestamp).map(|at| {
            (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        }))
    }
}
