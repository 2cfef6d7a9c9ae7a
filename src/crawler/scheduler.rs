//! Per-job crawl scheduler
//!
//! One scheduler runs per active job. It keeps up to `max_concurrent` fetch
//! tasks in flight, applies per-domain politeness, and drives the job's
//! lifecycle to a terminal state:
//! - `Run`: claim entries from the frontier and spawn fetch tasks
//! - `Pause`: stop claiming, let in-flight fetches finish, then idle
//! - `Cancel`: stop claiming, give in-flight fetches a grace period, abort
//!   the rest and discard the remaining frontier
//!
//! Everything a restart needs lives in storage, so a new scheduler picks up
//! where a crashed one stopped.

use crate::config::{CrawlerConfig, JobConfig};
use crate::crawler::extractor::{extract, ExtractedPage, RawResponse};
use crate::crawler::fetcher::{FetchError, FetchProfile, Fetcher};
use crate::crawler::frontier::{link_priority, EntryOutcome, Frontier, SEED_PRIORITY};
use crate::robots::{RobotsCache, RobotsPolicy};
use crate::state::{JobStatus, PolitenessTable};
use crate::storage::{db_timestamp, lock, CrawledPage, FrontierEntry, NewEntry, SharedStorage};
use crate::url::{domain_key, CrawlScope};
use crate::CrawlError;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use url::Url;

/// Skip reason recorded for URLs blocked by robots.txt
pub const ROBOTS_SKIP_REASON: &str = "disallowed by robots.txt";

/// Cooldown applied after a 429 without a usable `Retry-After`
const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Command sent from the coordinator to a running scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

/// Sliding record of fetch outcomes used to decide when a job has failed
#[derive(Debug, Clone)]
pub struct FailureTracker {
    window: VecDeque<bool>,
    window_size: usize,
    rate_threshold: f64,
    consecutive: u32,
    max_consecutive: u32,
}

impl FailureTracker {
    pub fn new(window_size: usize, rate_threshold: f64, max_consecutive: u32) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            rate_threshold,
            consecutive: 0,
            max_consecutive,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.failure_window,
            config.failure_rate_threshold,
            config.max_consecutive_failures,
        )
    }

    /// Records one fetch outcome
    pub fn record(&mut self, success: bool) {
        if success {
            self.consecutive = 0;
        } else {
            self.consecutive += 1;
        }

        if self.window_size == 0 {
            return;
        }
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(success);
    }

    /// Too many failures in a row; the job stops immediately
    pub fn consecutive_tripped(&self) -> bool {
        self.max_consecutive > 0 && self.consecutive >= self.max_consecutive
    }

    /// Failure rate over a full window
    pub fn failure_rate(&self) -> Option<f64> {
        if self.window_size == 0 || self.window.len() < self.window_size {
            return None;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        Some(failures as f64 / self.window.len() as f64)
    }

    /// Whether the last full window failed more often than allowed
    pub fn rate_exceeded(&self) -> bool {
        self.failure_rate()
            .is_some_and(|rate| rate > self.rate_threshold)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Everything a fetch task needs, shared by all tasks of one job
pub struct FetchContext {
    pub scope: CrawlScope,
    pub profile: FetchProfile,
    pub frontier: Frontier,
    pub fetcher: Fetcher,
    pub robots: Arc<RobotsCache>,
    /// Per-domain spacing shared with every other job in the process
    pub politeness: Arc<PolitenessTable>,
    /// Robots.txt product token
    pub agent: String,
    /// Upper bound on one task, robots lookup and storage included
    pub task_timeout: Duration,
}

impl FetchContext {
    fn job_id(&self) -> i64 {
        self.scope.job_id()
    }
}

/// What a finished fetch task reports back to the scheduler loop
#[derive(Debug)]
struct TaskReport {
    domain: String,
    outcome: TaskOutcome,
    /// Crawl-delay the domain's robots.txt asks for
    crawl_delay: Option<Duration>,
    /// Domain cooldown requested by the server (HTTP 429)
    cooldown: Option<Duration>,
}

#[derive(Debug, PartialEq, Eq)]
enum TaskOutcome {
    Fetched { discovered: usize },
    Failed,
    Skipped,
    /// The claim was reclaimed or discarded while the task ran
    Stale,
}

/// Drives one job from `running` to a terminal state
pub struct Scheduler {
    ctx: Arc<FetchContext>,
    storage: SharedStorage,
    max_pages: u64,
    max_concurrent: usize,
    request_delay: Duration,
    start_url: String,
    tick: Duration,
    cancel_grace: Duration,
    watchdog_period: Duration,
    control: watch::Receiver<ControlSignal>,
    settled: watch::Sender<Option<JobStatus>>,
    tasks: JoinSet<Result<TaskReport, CrawlError>>,
    /// Domains this job has claimed from, for idle wake-ups
    domains: HashSet<String>,
    failures: FailureTracker,
}

impl Scheduler {
    /// Creates a scheduler for a job that storage already shows as `running`
    ///
    /// # Arguments
    ///
    /// * `ctx` - Shared fetch context of the job
    /// * `job` - The job definition
    /// * `settings` - Engine-wide crawler settings
    /// * `control` - Control signals from the coordinator
    /// * `settled` - Receives `Some(status)` whenever the scheduler is idle
    ///   (paused and drained) or finished, `None` while it is working
    pub fn new(
        ctx: Arc<FetchContext>,
        job: &JobConfig,
        settings: &CrawlerConfig,
        control: watch::Receiver<ControlSignal>,
        settled: watch::Sender<Option<JobStatus>>,
    ) -> Self {
        let fetch_timeout = Duration::from_millis(settings.fetch_timeout_ms);
        Self {
            storage: ctx.frontier.storage().clone(),
            ctx,
            max_pages: u64::from(job.max_pages),
            max_concurrent: job.max_concurrent.max(1) as usize,
            request_delay: Duration::from_millis(job.request_delay_ms),
            start_url: job.start_url.clone(),
            tick: Duration::from_millis(settings.scheduling_tick_ms.max(1)),
            cancel_grace: Duration::from_millis(settings.cancel_grace_ms),
            watchdog_period: fetch_timeout.max(Duration::from_secs(1)),
            control,
            settled,
            tasks: JoinSet::new(),
            domains: HashSet::new(),
            failures: FailureTracker::from_config(settings),
        }
    }

    fn job_id(&self) -> i64 {
        self.ctx.job_id()
    }

    /// Runs the job until it reaches a terminal state or the coordinator
    /// goes away
    ///
    /// A scheduler error marks the job `failed` before it is returned.
    pub async fn run(mut self) -> Result<JobStatus, CrawlError> {
        let job_id = self.job_id();
        let result = self.run_loop().await;

        let status = match &result {
            Ok(status) => *status,
            Err(e) => {
                tracing::error!(job_id, error = %e, "Scheduler stopped with an error");
                self.tasks.abort_all();
                fail_job(&self.storage, job_id, &e.to_string()).unwrap_or_else(|err| {
                    tracing::error!(job_id, error = %err, "Could not mark job failed");
                    JobStatus::Failed
                })
            }
        };
        self.settled.send_replace(Some(status));
        result
    }

    async fn run_loop(&mut self) -> Result<JobStatus, CrawlError> {
        self.prepare().await?;

        let mut watchdog = tokio::time::interval(self.watchdog_period);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut detached = false;

        loop {
            let signal = if detached {
                ControlSignal::Pause
            } else {
                *self.control.borrow_and_update()
            };

            if signal == ControlSignal::Cancel {
                return self.finish_cancelled().await;
            }

            let mut wait = None;
            if signal == ControlSignal::Run {
                self.settled.send_if_modified(|settled| settled.take().is_some());

                if self.failures.consecutive_tripped() {
                    let message = format!(
                        "stopped after {} consecutive failures",
                        self.failures.consecutive()
                    );
                    self.drain().await?;
                    if let Some(status) = self.conclude(JobStatus::Failed, Some(&message)).await? {
                        return Ok(status);
                    }
                    continue;
                }

                self.dispatch()?;

                if self.tasks.is_empty() {
                    if let Some(verdict) = self.completion_verdict()? {
                        let (status, message) = verdict;
                        if let Some(status) = self.conclude(status, message.as_deref()).await? {
                            return Ok(status);
                        }
                    }
                }
                wait = Some(self.idle_wait()?);
            } else if self.tasks.is_empty() {
                if detached {
                    tracing::info!(job_id = self.job_id(), "Coordinator gone, scheduler exiting");
                    return current_status(&self.storage, self.job_id());
                }
                self.settled
                    .send_if_modified(|settled| settled.replace(JobStatus::Paused).is_none());
            }

            let has_tasks = !self.tasks.is_empty();
            tokio::select! {
                Some(joined) = self.tasks.join_next(), if has_tasks => {
                    self.handle_join(joined)?;
                }
                changed = self.control.changed(), if !detached => {
                    if changed.is_err() {
                        detached = true;
                    }
                }
                _ = tokio::time::sleep(wait.unwrap_or(self.tick)), if wait.is_some() => {}
                _ = watchdog.tick() => {
                    self.ctx
                        .frontier
                        .reclaim_stale(self.job_id(), self.ctx.task_timeout + self.watchdog_period)?;
                }
            }
        }
    }

    /// Recovers leftovers of a previous run and seeds an empty frontier
    async fn prepare(&mut self) -> Result<(), CrawlError> {
        let job_id = self.job_id();

        // Anything still processing belongs to a scheduler that no longer runs
        self.ctx.frontier.reclaim_stale(job_id, Duration::ZERO)?;

        let counts = self.ctx.frontier.counts(job_id, Duration::ZERO)?;
        if counts.total() > 0 {
            tracing::info!(
                job_id,
                pending = counts.pending,
                completed = counts.completed,
                "Resuming from stored frontier"
            );
            return Ok(());
        }

        let seed = self.seed_entry().await?;
        tracing::info!(job_id, url = %seed.url, "Seeding frontier");
        self.ctx.frontier.insert(job_id, &seed)?;
        Ok(())
    }

    /// The start URL at depth 0 and top priority
    ///
    /// Include/exclude patterns do not apply to the start URL; robots.txt does.
    async fn seed_entry(&self) -> Result<NewEntry, CrawlError> {
        let normalizer = self.ctx.scope.normalizer();
        let url = normalizer.resolve(&self.start_url, None)?;
        let normalized = normalizer.normalize(&self.start_url, None)?;
        let domain = domain_key(&normalized).ok_or(crate::UrlError::MissingDomain)?;

        let policy = self.ctx.robots.get_policy(&url).await;
        let skip_reason = (!policy.is_allowed(url.as_str(), &self.ctx.agent))
            .then(|| ROBOTS_SKIP_REASON.to_string());

        Ok(NewEntry {
            url: url.to_string(),
            normalized_url: normalized.to_string(),
            domain,
            depth: 0,
            priority: SEED_PRIORITY,
            parent_url: None,
            anchor_text: None,
            skip_reason,
        })
    }

    /// Fills free task slots with claimable entries
    fn dispatch(&mut self) -> Result<(), CrawlError> {
        let job_id = self.job_id();
        let crawled = {
            let storage = lock(&self.storage)?;
            storage
                .get_job(job_id)?
                .ok_or(CrawlError::JobNotFound(job_id))?
                .pages_crawled
        };

        while self.tasks.len() < self.max_concurrent
            && crawled + (self.tasks.len() as u64) < self.max_pages
        {
            let now = Instant::now();
            let request_delay = self.request_delay;
            let robots = &self.ctx.robots;
            let politeness = &self.ctx.politeness;
            let agent = &self.ctx.agent;

            // A granted slot is already recorded in the shared table
            let entry = self.ctx.frontier.dequeue_next(job_id, |domain| {
                if let Some(delay) = robots.peek(domain).and_then(|p| p.crawl_delay(agent)) {
                    politeness.raise_interval(domain, delay);
                }
                let ready = politeness.try_acquire(domain, request_delay, now);
                tracing::trace!(domain, ready, "Checking domain readiness");
                ready
            })?;

            let Some(entry) = entry else {
                break;
            };
            self.domains.insert(entry.domain.clone());

            tracing::debug!(
                job_id,
                url = %entry.url,
                depth = entry.depth,
                attempt = entry.attempts,
                "Dispatching fetch"
            );
            self.tasks.spawn(process_entry(Arc::clone(&self.ctx), entry));
        }

        Ok(())
    }

    fn handle_join(
        &mut self,
        joined: Result<Result<TaskReport, CrawlError>, JoinError>,
    ) -> Result<(), CrawlError> {
        let report = match joined {
            Ok(report) => report?,
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => {
                // The entry stays processing until the watchdog reclaims it
                tracing::error!(job_id = self.job_id(), error = %e, "Fetch task panicked");
                return Ok(());
            }
        };

        let politeness = &self.ctx.politeness;
        if let Some(delay) = report.crawl_delay {
            politeness.raise_interval(&report.domain, delay);
        }
        if let Some(cooldown) = report.cooldown {
            tracing::warn!(
                domain = %report.domain,
                cooldown_ms = cooldown.as_millis() as u64,
                "Domain rate limited"
            );
            politeness.apply_cooldown(&report.domain, Instant::now(), cooldown);
        }

        match report.outcome {
            TaskOutcome::Fetched { discovered } => {
                tracing::trace!(domain = %report.domain, discovered, "Fetch task finished");
                self.failures.record(true);
            }
            TaskOutcome::Failed => self.failures.record(false),
            TaskOutcome::Skipped | TaskOutcome::Stale => {}
        }

        Ok(())
    }

    /// Waits for every in-flight task
    async fn drain(&mut self) -> Result<(), CrawlError> {
        while let Some(joined) = self.tasks.join_next().await {
            self.handle_join(joined)?;
        }
        Ok(())
    }

    /// Decides whether a job with nothing in flight is done
    fn completion_verdict(&self) -> Result<Option<(JobStatus, Option<String>)>, CrawlError> {
        let job_id = self.job_id();
        let job = lock(&self.storage)?
            .get_job(job_id)?
            .ok_or(CrawlError::JobNotFound(job_id))?;
        let counts = self.ctx.frontier.counts(job_id, Duration::ZERO)?;

        let bound_reached = job.pages_crawled >= self.max_pages;
        // Processing entries with no task left are orphans the watchdog will requeue
        if !bound_reached && (counts.pending > 0 || counts.processing > 0) {
            return Ok(None);
        }

        if job.pages_successful == 0 && job.pages_failed > 0 {
            return Ok(Some((
                JobStatus::Failed,
                Some("no page could be fetched".to_string()),
            )));
        }
        if self.failures.rate_exceeded() {
            let rate = self.failures.failure_rate().unwrap_or_default();
            return Ok(Some((
                JobStatus::Failed,
                Some(format!("failure rate {:.0}% over the last fetches", rate * 100.0)),
            )));
        }
        Ok(Some((JobStatus::Completed, None)))
    }

    /// Moves a running job to a terminal status
    ///
    /// Returns `None` when the job is no longer `running` but not terminal
    /// either (paused concurrently); the loop then follows the control signal.
    fn finish(
        &self,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<Option<JobStatus>, CrawlError> {
        let job_id = self.job_id();
        let now = db_timestamp(Utc::now());
        let mut storage = lock(&self.storage)?;

        if let Some(message) = message {
            storage.record_job_error(job_id, message, &now)?;
        }
        if storage.transition_job(job_id, &[JobStatus::Running], status, &now)? {
            tracing::info!(job_id, %status, "Job finished");
            return Ok(Some(status));
        }

        let current = storage
            .get_job(job_id)?
            .ok_or(CrawlError::JobNotFound(job_id))?
            .status;
        Ok(current.is_terminal().then_some(current))
    }

    /// Finishes the job, or stops it as cancelled when a cancel won the race
    ///
    /// A cancel that lands between the verdict and the transition leaves the
    /// job `cancelled` in storage with entries still pending; those go
    /// through the same discard as any other cancel.
    async fn conclude(
        &mut self,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<Option<JobStatus>, CrawlError> {
        match self.finish(status, message)? {
            Some(JobStatus::Cancelled) if status != JobStatus::Cancelled => {
                tracing::info!(job_id = self.job_id(), "Job was cancelled before it could finish");
                self.finish_cancelled().await.map(Some)
            }
            other => Ok(other),
        }
    }

    /// Stops a cancelled job
    async fn finish_cancelled(&mut self) -> Result<JobStatus, CrawlError> {
        let job_id = self.job_id();
        let grace = self.cancel_grace;

        if tokio::time::timeout(grace, self.drain()).await.is_err() {
            tracing::info!(job_id, in_flight = self.tasks.len(), "Aborting in-flight fetches");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        let discarded = self.ctx.frontier.discard_pending(job_id, "job cancelled")?;
        let now = db_timestamp(Utc::now());
        lock(&self.storage)?.transition_job(
            job_id,
            &[JobStatus::Idle, JobStatus::Queued, JobStatus::Running, JobStatus::Paused],
            JobStatus::Cancelled,
            &now,
        )?;
        tracing::info!(job_id, discarded, "Job cancelled");
        Ok(JobStatus::Cancelled)
    }

    /// How long to sleep before the next readiness check
    fn idle_wait(&self) -> Result<Duration, CrawlError> {
        let now = Instant::now();
        let domain_wait = self
            .domains
            .iter()
            .filter_map(|domain| self.ctx.politeness.time_until(domain, self.request_delay, now))
            .min();
        let retry_wait = self.ctx.frontier.next_retry_in(self.job_id())?;

        let wait = [Some(self.tick), domain_wait, retry_wait]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(self.tick);
        Ok(wait.max(Duration::from_millis(1)))
    }
}

/// Marks a job failed after an unrecoverable scheduler error
pub fn fail_job(storage: &SharedStorage, job_id: i64, message: &str) -> Result<JobStatus, CrawlError> {
    let now = db_timestamp(Utc::now());
    let mut storage = lock(storage)?;
    storage.record_job_error(job_id, message, &now)?;
    storage.transition_job(
        job_id,
        &[JobStatus::Idle, JobStatus::Queued, JobStatus::Running, JobStatus::Paused],
        JobStatus::Failed,
        &now,
    )?;
    Ok(storage
        .get_job(job_id)?
        .map_or(JobStatus::Failed, |job| job.status))
}

fn current_status(storage: &SharedStorage, job_id: i64) -> Result<JobStatus, CrawlError> {
    lock(storage)?
        .get_job(job_id)?
        .map(|job| job.status)
        .ok_or(CrawlError::JobNotFound(job_id))
}

/// Fetches one claimed entry, bounded by the task timeout
async fn process_entry(ctx: Arc<FetchContext>, entry: FrontierEntry) -> Result<TaskReport, CrawlError> {
    match tokio::time::timeout(ctx.task_timeout, fetch_and_record(&ctx, &entry)).await {
        Ok(report) => report,
        Err(_) => {
            let status = ctx
                .frontier
                .mark_result(&entry, EntryOutcome::retryable("fetch task timed out"))?;
            tracing::warn!(url = %entry.url, attempt = entry.attempts, "Fetch task timed out");
            Ok(TaskReport {
                domain: entry.domain.clone(),
                outcome: if status.is_some() {
                    TaskOutcome::Failed
                } else {
                    TaskOutcome::Stale
                },
                crawl_delay: None,
                cooldown: None,
            })
        }
    }
}

async fn fetch_and_record(ctx: &FetchContext, entry: &FrontierEntry) -> Result<TaskReport, CrawlError> {
    let mut report = TaskReport {
        domain: entry.domain.clone(),
        outcome: TaskOutcome::Failed,
        crawl_delay: None,
        cooldown: None,
    };

    let url = match Url::parse(&entry.url) {
        Ok(url) => url,
        Err(e) => {
            let status = ctx
                .frontier
                .mark_result(entry, EntryOutcome::terminal(format!("invalid URL: {}", e)))?;
            report.outcome = stale_or(status.is_some(), TaskOutcome::Failed);
            return Ok(report);
        }
    };

    let policy = ctx.robots.get_policy(&url).await;
    report.crawl_delay = policy.crawl_delay(&ctx.agent);
    if !policy.is_allowed(url.as_str(), &ctx.agent) {
        tracing::debug!(url = %url, "Disallowed by robots.txt");
        let status = ctx.frontier.mark_result(
            entry,
            EntryOutcome::Skipped {
                reason: ROBOTS_SKIP_REASON.to_string(),
            },
        )?;
        report.outcome = stale_or(status.is_some(), TaskOutcome::Skipped);
        return Ok(report);
    }

    let response = match ctx.fetcher.fetch(&url, &ctx.profile).await {
        Ok(response) => response,
        Err(e) => {
            let retry_after = match &e {
                FetchError::RateLimited { retry_after } => {
                    let cooldown = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN);
                    report.cooldown = Some(cooldown);
                    Some(cooldown)
                }
                _ => None,
            };
            if e.is_retryable() {
                tracing::warn!(url = %url, attempt = entry.attempts, error = %e, "Fetch failed");
            } else {
                tracing::debug!(url = %url, error = %e, "Fetch failed permanently");
            }
            let status = ctx.frontier.mark_result(
                entry,
                EntryOutcome::Failed {
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                    retry_after,
                },
            )?;
            report.outcome = stale_or(status.is_some(), TaskOutcome::Failed);
            return Ok(report);
        }
    };

    let extracted = match extract(&response) {
        Ok(page) => page,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Extraction failed");
            let status = ctx
                .frontier
                .mark_result(entry, EntryOutcome::terminal(format!("extraction failed: {}", e)))?;
            report.outcome = stale_or(status.is_some(), TaskOutcome::Failed);
            return Ok(report);
        }
    };

    let discoveries = prepare_discoveries(ctx, entry, &extracted).await;
    let page = build_page(ctx, entry, &response, extracted);

    match ctx.frontier.commit_page(entry, &page, &discoveries)? {
        Some(commit) => {
            tracing::debug!(
                url = %url,
                words = page.word_count,
                discovered = commit.inserted,
                "Page stored"
            );
            report.outcome = TaskOutcome::Fetched {
                discovered: commit.inserted,
            };
        }
        None => report.outcome = TaskOutcome::Stale,
    }
    Ok(report)
}

fn stale_or(applied: bool, outcome: TaskOutcome) -> TaskOutcome {
    if applied {
        outcome
    } else {
        TaskOutcome::Stale
    }
}

/// Admits a page's links at the next depth and applies robots.txt
///
/// Robots policies of all linked domains are looked up concurrently;
/// disallowed links are recorded as skipped so they are never claimed.
async fn prepare_discoveries(
    ctx: &FetchContext,
    entry: &FrontierEntry,
    page: &ExtractedPage,
) -> Vec<NewEntry> {
    let depth = entry.depth + 1;
    if depth > ctx.scope.max_depth() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut discoveries = Vec::new();
    for link in &page.links {
        match Frontier::prepare(
            &ctx.scope,
            &link.url,
            None,
            depth,
            link_priority(depth),
            Some(&entry.url),
            link.anchor_text.as_deref(),
        ) {
            Ok(discovery) => {
                if seen.insert(discovery.normalized_url.clone()) {
                    discoveries.push(discovery);
                }
            }
            Err(reason) => tracing::trace!(url = %link.url, %reason, "Link not admitted"),
        }
    }

    let mut by_domain: HashMap<&str, Url> = HashMap::new();
    for discovery in &discoveries {
        if let Ok(url) = Url::parse(&discovery.url) {
            by_domain.entry(discovery.domain.as_str()).or_insert(url);
        }
    }
    let lookups = by_domain.iter().map(|(domain, url)| async move {
        (domain.to_string(), ctx.robots.get_policy(url).await)
    });
    let policies: HashMap<String, Arc<RobotsPolicy>> = join_all(lookups).await.into_iter().collect();

    for discovery in &mut discoveries {
        let allowed = policies
            .get(&discovery.domain)
            .map_or(true, |policy| policy.is_allowed(&discovery.url, &ctx.agent));
        if !allowed {
            discovery.skip_reason = Some(ROBOTS_SKIP_REASON.to_string());
        }
    }

    discoveries
}

fn build_page(
    ctx: &FetchContext,
    entry: &FrontierEntry,
    response: &RawResponse,
    extracted: ExtractedPage,
) -> CrawledPage {
    let normalizer = ctx.scope.normalizer();
    let links = extracted
        .links
        .iter()
        .filter_map(|link| normalizer.normalize(&link.url, None).ok())
        .map(|url| url.to_string())
        .collect();

    CrawledPage {
        id: 0,
        job_id: entry.job_id,
        entry_id: entry.id,
        url: entry.url.clone(),
        final_url: response.final_url.to_string(),
        status_code: response.status,
        content_type: response.content_type.clone(),
        title: extracted.title,
        description: extracted.description,
        author: extracted.author,
        published_at: extracted.published_at,
        text_content: extracted.text_content,
        markdown: extracted.markdown,
        word_count: extracted.word_count,
        link_count: extracted.link_count,
        image_count: extracted.image_count,
        code_block_count: extracted.code_block_count,
        table_count: extracted.table_count,
        links,
        content_hash: extracted.content_hash,
        crawled_at: db_timestamp(Utc::now()),
    }
}
