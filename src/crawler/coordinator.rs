//! Crawl coordinator - the engine facade
//!
//! The coordinator owns everything shared between jobs and exposes the
//! operations callers use to drive them:
//! - Storage, the HTTP fetcher, the process-wide robots.txt cache and the
//!   per-domain politeness table every job spaces its requests through
//! - Job creation and registration of named job definitions
//! - Lifecycle commands (start, pause, resume, cancel) and waiting
//! - Read-side queries (job, status, queue, pages)
//! - The recurring-schedule poller and crash recovery
//!
//! Each started job gets its own [`Scheduler`] task; the coordinator keeps
//! the control channel of every live scheduler.

use crate::config::{validate_job, Config, CrawlerConfig, JobConfig, UserAgentConfig};
use crate::crawler::fetcher::{build_http_client, build_robots_client, FetchProfile, Fetcher};
use crate::crawler::frontier::{Frontier, RetryPolicy};
use crate::crawler::scheduler::{ControlSignal, FetchContext, Scheduler};
use crate::output::{compute_status, JobStatusReport};
use crate::robots::RobotsCache;
use crate::schedule::{is_due, next_run};
use crate::state::{EntryStatus, JobStatus, PolitenessTable};
use crate::storage::{
    db_timestamp, lock, open_storage, CrawlJob, CrawledPage, FrontierEntry, SharedStorage,
};
use crate::url::{CrawlScope, UrlNormalizer};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Statuses from which a job can still be cancelled
const CANCELLABLE: &[JobStatus] = &[
    JobStatus::Idle,
    JobStatus::Queued,
    JobStatus::Running,
    JobStatus::Paused,
];

/// A live scheduler task
struct JobHandle {
    control: watch::Sender<ControlSignal>,
    settled: watch::Receiver<Option<JobStatus>>,
    task: JoinHandle<()>,
}

impl JobHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    settings: CrawlerConfig,
    /// Robots.txt product token
    agent: String,
    storage: SharedStorage,
    frontier: Frontier,
    fetcher: Fetcher,
    robots: Arc<RobotsCache>,
    politeness: Arc<PolitenessTable>,
    normalizer: UrlNormalizer,
    handles: Mutex<HashMap<i64, JobHandle>>,
}

impl Coordinator {
    /// Creates a coordinator from a loaded configuration
    ///
    /// Opens (or creates) the database at `storage.database-path`.
    pub fn new(config: &Config) -> Result<Self, CrawlError> {
        let storage = open_storage(Path::new(&config.storage.database_path))?;
        Self::with_storage(config.crawler.clone(), &config.user_agent, storage)
    }

    /// Creates a coordinator on top of an existing storage handle
    ///
    /// # Arguments
    ///
    /// * `settings` - Engine-wide crawler settings
    /// * `user_agent` - Crawler identity for requests and robots.txt
    /// * `storage` - Shared storage backend
    pub fn with_storage(
        settings: CrawlerConfig,
        user_agent: &UserAgentConfig,
        storage: SharedStorage,
    ) -> Result<Self, CrawlError> {
        let client = build_http_client(user_agent, &settings)?;
        let robots_client = build_robots_client(user_agent, &settings)?;

        Ok(Self {
            agent: user_agent.crawler_name.clone(),
            frontier: Frontier::new(storage.clone(), RetryPolicy::from_config(&settings)),
            fetcher: Fetcher::new(client, &settings),
            robots: Arc::new(RobotsCache::new(robots_client)),
            politeness: Arc::new(PolitenessTable::new()),
            normalizer: UrlNormalizer::new(settings.tracking_params.clone()),
            storage,
            settings,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn robots(&self) -> &Arc<RobotsCache> {
        &self.robots
    }

    pub fn politeness(&self) -> &Arc<PolitenessTable> {
        &self.politeness
    }

    // ===== Job Definitions =====

    /// Creates a new `idle` job
    ///
    /// A job with a schedule gets its first `next_scheduled_run`; it acts as
    /// the template that [`dispatch_due`](Self::dispatch_due) clones runs from.
    pub fn create_job(&self, config: &JobConfig) -> Result<i64, CrawlError> {
        validate_job(config)?;
        let now = Utc::now();
        let mut storage = lock(&self.storage)?;
        let job_id = storage.create_job(config, JobStatus::Idle, None, &db_timestamp(now))?;

        if let Some(schedule) = &config.schedule {
            let next = next_run(schedule, now).map(db_timestamp);
            storage.set_next_scheduled_run(job_id, next.as_deref())?;
        }

        tracing::info!(job_id, url = %config.start_url, "Created job");
        Ok(job_id)
    }

    /// Creates a job, or updates the stored job with the same name
    ///
    /// Unnamed jobs are always created. For a named job whose definition
    /// changed, the stored definition is replaced and its schedule recomputed.
    pub fn register_job(&self, config: &JobConfig) -> Result<i64, CrawlError> {
        let Some(name) = &config.name else {
            return self.create_job(config);
        };

        let existing = lock(&self.storage)?.find_job_by_name(name)?;
        let Some(existing) = existing else {
            return self.create_job(config);
        };

        if existing.config != *config {
            validate_job(config)?;
            let now = Utc::now();
            let mut storage = lock(&self.storage)?;
            storage.update_job_config(existing.id, config, &db_timestamp(now))?;
            let next = config
                .schedule
                .as_ref()
                .and_then(|schedule| next_run(schedule, now))
                .map(db_timestamp);
            storage.set_next_scheduled_run(existing.id, next.as_deref())?;
            tracing::info!(job_id = existing.id, name = %name, "Updated job definition");
        } else if config.schedule.is_some() && existing.next_scheduled_run.is_none() {
            let next = config
                .schedule
                .as_ref()
                .and_then(|schedule| next_run(schedule, Utc::now()))
                .map(db_timestamp);
            lock(&self.storage)?.set_next_scheduled_run(existing.id, next.as_deref())?;
        }

        Ok(existing.id)
    }

    // ===== Lifecycle =====

    /// Starts an `idle` or `queued` job
    ///
    /// Must be called from within a Tokio runtime; the job's scheduler runs
    /// as a spawned task.
    pub fn start_job(&self, job_id: i64) -> Result<(), CrawlError> {
        let job = self.transition(job_id, &[JobStatus::Idle, JobStatus::Queued], JobStatus::Running)?;
        tracing::info!(job_id, url = %job.start_url, "Starting job");
        self.spawn_scheduler(&job)
    }

    /// Starts a job that never ran, or a fresh run of a finished one
    ///
    /// # Returns
    ///
    /// The ID of the job that is now running
    pub fn launch(&self, job_id: i64) -> Result<i64, CrawlError> {
        let job = self.get_job(job_id)?;
        match job.status {
            JobStatus::Idle | JobStatus::Queued => {
                self.start_job(job_id)?;
                Ok(job_id)
            }
            status if status.is_terminal() => {
                let run_id = self.create_run(&job)?;
                self.start_job(run_id)?;
                Ok(run_id)
            }
            status => Err(CrawlError::InvalidTransition {
                job_id,
                from: status,
                to: JobStatus::Running,
            }),
        }
    }

    /// Stops pulling new work; in-flight fetches finish
    pub fn pause(&self, job_id: i64) -> Result<(), CrawlError> {
        self.transition(job_id, &[JobStatus::Running], JobStatus::Paused)?;
        tracing::info!(job_id, "Pausing job");
        self.signal(job_id, ControlSignal::Pause)?;
        Ok(())
    }

    /// Continues a paused job from its stored frontier
    pub fn resume(&self, job_id: i64) -> Result<(), CrawlError> {
        let job = self.transition(job_id, &[JobStatus::Paused], JobStatus::Running)?;
        tracing::info!(job_id, "Resuming job");
        if !self.signal(job_id, ControlSignal::Run)? {
            self.spawn_scheduler(&job)?;
        }
        Ok(())
    }

    /// Cancels a job and discards its remaining frontier
    ///
    /// In-flight fetches get the configured grace period before they are
    /// aborted.
    pub fn cancel(&self, job_id: i64) -> Result<(), CrawlError> {
        self.transition(job_id, CANCELLABLE, JobStatus::Cancelled)?;
        tracing::info!(job_id, "Cancelling job");
        if !self.signal(job_id, ControlSignal::Cancel)? {
            let discarded = self.frontier.discard_pending(job_id, "job cancelled")?;
            tracing::debug!(job_id, discarded, "Discarded frontier of idle job");
        }
        Ok(())
    }

    /// Waits until a job is terminal, or paused with nothing in flight
    ///
    /// Returns immediately with the stored status for jobs without a live
    /// scheduler.
    pub async fn wait(&self, job_id: i64) -> Result<JobStatus, CrawlError> {
        let settled = {
            let handles = self.handles.lock().map_err(|_| CrawlError::LockPoisoned)?;
            handles.get(&job_id).map(|handle| handle.settled.clone())
        };

        if let Some(mut settled) = settled {
            loop {
                let current = *settled.borrow_and_update();
                match current {
                    Some(status) if status.is_terminal() => break,
                    Some(JobStatus::Paused) => {
                        // A resume may not have reached the scheduler yet
                        if self.get_job(job_id)?.status == JobStatus::Paused {
                            break;
                        }
                    }
                    _ => {}
                }
                if settled.changed().await.is_err() {
                    break;
                }
            }
        }

        Ok(self.get_job(job_id)?.status)
    }

    /// IDs of jobs with a live scheduler
    pub fn active_jobs(&self) -> Result<Vec<i64>, CrawlError> {
        let handles = self.handles.lock().map_err(|_| CrawlError::LockPoisoned)?;
        let mut ids: Vec<i64> = handles
            .iter()
            .filter(|(_, handle)| handle.is_live())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    // ===== Queries =====

    pub fn get_job(&self, job_id: i64) -> Result<CrawlJob, CrawlError> {
        lock(&self.storage)?
            .get_job(job_id)?
            .ok_or(CrawlError::JobNotFound(job_id))
    }

    pub fn list_jobs(&self) -> Result<Vec<CrawlJob>, CrawlError> {
        Ok(lock(&self.storage)?.list_jobs()?)
    }

    /// Live status projection of a job
    pub fn get_status(&self, job_id: i64) -> Result<JobStatusReport, CrawlError> {
        let job = self.get_job(job_id)?;
        let window = Duration::from_secs(self.settings.status_window_secs);
        let counts = self.frontier.counts(job_id, window)?;
        Ok(compute_status(&job, &counts, Utc::now(), window))
    }

    /// A job's frontier entries in dequeue order, optionally by status
    pub fn list_queue(
        &self,
        job_id: i64,
        status: Option<EntryStatus>,
    ) -> Result<Vec<FrontierEntry>, CrawlError> {
        let storage = lock(&self.storage)?;
        storage.get_job(job_id)?.ok_or(CrawlError::JobNotFound(job_id))?;
        Ok(storage.list_entries(job_id, status)?)
    }

    /// Every successfully fetched page of a job, in crawl order
    pub fn get_successful_pages(&self, job_id: i64) -> Result<Vec<CrawledPage>, CrawlError> {
        let storage = lock(&self.storage)?;
        storage.get_job(job_id)?.ok_or(CrawlError::JobNotFound(job_id))?;
        Ok(storage.get_pages(job_id)?)
    }

    // ===== Scheduling and Recovery =====

    /// Starts a run for every scheduled job that is due at `now`
    ///
    /// Each due job gets its next run time recomputed. A job whose previous
    /// run is still active is not started twice.
    ///
    /// # Returns
    ///
    /// IDs of the runs that were started
    pub fn dispatch_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>, CrawlError> {
        let (due, active) = {
            let storage = lock(&self.storage)?;
            let due = storage.due_scheduled_jobs(&db_timestamp(now))?;
            let active = storage.list_jobs_by_status(&[
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Paused,
            ])?;
            (due, active)
        };

        let mut started = Vec::new();
        for template in due {
            if !is_due(template.next_scheduled_run.as_deref(), now) {
                continue;
            }
            let next = template
                .config
                .schedule
                .as_ref()
                .and_then(|schedule| next_run(schedule, now))
                .map(db_timestamp);
            lock(&self.storage)?.set_next_scheduled_run(template.id, next.as_deref())?;

            if active.iter().any(|job| job.parent_job_id == Some(template.id)) {
                tracing::info!(job_id = template.id, "Previous run still active, skipping");
                continue;
            }

            let run_id = self.create_run(&template)?;
            tracing::info!(job_id = template.id, run_id, "Dispatching scheduled run");
            self.start_job(run_id)?;
            started.push(run_id);
        }

        Ok(started)
    }

    /// Restarts jobs a previous process left `running` or `queued`
    ///
    /// The new schedulers hand entries stuck in `processing` back to the
    /// frontier before claiming anything.
    pub fn recover(&self) -> Result<Vec<i64>, CrawlError> {
        let jobs = lock(&self.storage)?.list_jobs_by_status(&[JobStatus::Running, JobStatus::Queued])?;

        let mut recovered = Vec::new();
        for job in jobs {
            if self.has_live_scheduler(job.id)? {
                continue;
            }
            match job.status {
                JobStatus::Running => {
                    tracing::info!(job_id = job.id, "Recovering interrupted job");
                    self.spawn_scheduler(&job)?;
                }
                _ => self.start_job(job.id)?,
            }
            recovered.push(job.id);
        }
        Ok(recovered)
    }

    // ===== Internals =====

    /// A new `queued` run of a job's definition
    fn create_run(&self, template: &CrawlJob) -> Result<i64, CrawlError> {
        let now = db_timestamp(Utc::now());
        let run_id = lock(&self.storage)?.create_job(
            &template.config,
            JobStatus::Queued,
            Some(template.id),
            &now,
        )?;
        Ok(run_id)
    }

    /// Compare-and-swap on the job status
    fn transition(
        &self,
        job_id: i64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<CrawlJob, CrawlError> {
        let now = db_timestamp(Utc::now());
        let mut storage = lock(&self.storage)?;
        let job = storage.get_job(job_id)?.ok_or(CrawlError::JobNotFound(job_id))?;

        if !from.contains(&job.status) || !job.status.can_transition_to(to) {
            return Err(CrawlError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            });
        }
        if !storage.transition_job(job_id, from, to, &now)? {
            let current = storage
                .get_job(job_id)?
                .map_or(job.status, |job| job.status);
            return Err(CrawlError::InvalidTransition {
                job_id,
                from: current,
                to,
            });
        }

        Ok(CrawlJob { status: to, ..job })
    }

    /// Sends a control signal to a live scheduler
    ///
    /// Returns false if the job has no live scheduler.
    fn signal(&self, job_id: i64, signal: ControlSignal) -> Result<bool, CrawlError> {
        let handles = self.handles.lock().map_err(|_| CrawlError::LockPoisoned)?;
        match handles.get(&job_id) {
            Some(handle) if handle.is_live() => Ok(handle.control.send(signal).is_ok()),
            _ => Ok(false),
        }
    }

    fn has_live_scheduler(&self, job_id: i64) -> Result<bool, CrawlError> {
        let handles = self.handles.lock().map_err(|_| CrawlError::LockPoisoned)?;
        Ok(handles.get(&job_id).is_some_and(JobHandle::is_live))
    }

    fn spawn_scheduler(&self, job: &CrawlJob) -> Result<(), CrawlError> {
        let mut handles = self.handles.lock().map_err(|_| CrawlError::LockPoisoned)?;
        if handles.get(&job.id).is_some_and(JobHandle::is_live) {
            return Ok(());
        }

        let ctx = Arc::new(FetchContext {
            scope: CrawlScope::new(job.id, &job.config, self.normalizer.clone())?,
            profile: FetchProfile::from_job(&job.config)?,
            frontier: self.frontier.clone(),
            fetcher: self.fetcher.clone(),
            robots: Arc::clone(&self.robots),
            politeness: Arc::clone(&self.politeness),
            agent: self.agent.clone(),
            task_timeout: Duration::from_millis(self.settings.fetch_timeout_ms.saturating_mul(2)),
        });

        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);
        let (settled_tx, settled_rx) = watch::channel(None);
        let scheduler = Scheduler::new(ctx, &job.config, &self.settings, control_rx, settled_tx);

        let job_id = job.id;
        let task = tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                tracing::debug!(job_id, error = %e, "Scheduler task ended with an error");
            }
        });

        handles.insert(
            job.id,
            JobHandle {
                control: control_tx,
                settled: settled_rx,
                task,
            },
        );
        Ok(())
    }
}
