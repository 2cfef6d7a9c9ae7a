//! Job status projection
//!
//! Combines a job's stored counters with live frontier counts into the view
//! dashboards poll: progress, crawl speed over a trailing window, and an ETA.
//! Pure functions only; nothing here touches storage.

use crate::state::JobStatus;
use crate::storage::{parse_db_timestamp, CrawlJob, FrontierCounts};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Read-side view of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: i64,
    pub name: Option<String>,
    pub start_url: String,
    pub status: JobStatus,
    pub pages_discovered: u64,
    pub pages_crawled: u64,
    pub pages_successful: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    /// Entries waiting to be fetched
    pub pending: u64,
    /// Entries being fetched right now
    pub processing: u64,
    pub total_words: u64,
    pub total_links: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    /// 0-100
    pub progress_percent: f64,
    pub pages_per_minute: f64,
    pub eta_seconds: Option<u64>,
    pub elapsed_seconds: Option<u64>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Computes the status view of a job
///
/// # Arguments
///
/// * `job` - The stored job record
/// * `counts` - Live frontier counts; `recent_completions` must cover the
///   trailing `window` ending at `now`
/// * `now` - The time the counts were read
/// * `window` - Length of the trailing speed window
///
/// # Speed and ETA
///
/// While a job runs, speed is the number of completions in the trailing
/// window divided by the window length, where the window never reaches back
/// past the job's start. Finished jobs report their average speed over the
/// whole run. The ETA divides the remaining work (pending plus in-flight
/// entries, capped by the page budget) by the current speed and is only
/// given for running jobs.
pub fn compute_status(
    job: &CrawlJob,
    counts: &FrontierCounts,
    now: DateTime<Utc>,
    window: Duration,
) -> JobStatusReport {
    let started = job.started_at.as_deref().and_then(parse_db_timestamp);
    let finished = job.finished_at.as_deref().and_then(parse_db_timestamp);
    let end = finished.unwrap_or(now);
    let elapsed = started.map(|s| (end - s).to_std().unwrap_or_default());

    let pages_per_minute = match (job.status.is_terminal(), elapsed) {
        (_, None) => 0.0,
        (true, Some(elapsed)) => per_minute(job.pages_crawled, elapsed),
        (false, Some(elapsed)) => per_minute(counts.recent_completions, elapsed.min(window)),
    };

    let budget_left = u64::from(job.config.max_pages).saturating_sub(job.pages_crawled);
    let remaining = if job.status.is_terminal() {
        0
    } else {
        (counts.pending + counts.processing).min(budget_left)
    };

    let eta_seconds = (job.status == JobStatus::Running && pages_per_minute > 0.0)
        .then(|| (remaining as f64 / pages_per_minute * 60.0).ceil() as u64);

    let planned = job.pages_crawled + remaining;
    let progress_percent = if planned == 0 {
        if job.status.is_terminal() {
            100.0
        } else {
            0.0
        }
    } else {
        job.pages_crawled as f64 / planned as f64 * 100.0
    };

    JobStatusReport {
        job_id: job.id,
        name: job.name.clone(),
        start_url: job.start_url.clone(),
        status: job.status,
        pages_discovered: job.pages_discovered,
        pages_crawled: job.pages_crawled,
        pages_successful: job.pages_successful,
        pages_failed: job.pages_failed,
        pages_skipped: job.pages_skipped,
        pending: counts.pending,
        processing: counts.processing,
        total_words: job.total_words,
        total_links: job.total_links,
        error_count: job.error_count,
        last_error: job.last_error.clone(),
        progress_percent,
        pages_per_minute,
        eta_seconds,
        elapsed_seconds: elapsed.map(|e| e.as_secs()),
        started_at: job.started_at.clone(),
        finished_at: job.finished_at.clone(),
    }
}

fn per_minute(pages: u64, over: Duration) -> f64 {
    let minutes = over.as_secs_f64() / 60.0;
    if minutes <= 0.0 {
        0.0
    } else {
        pages as f64 / minutes
    }
}

/// Prints a status report to stdout
pub fn print_status(report: &JobStatusReport) {
    let label = report.name.as_deref().unwrap_or(&report.start_url);
    println!("=== Job {} ({}) ===", report.job_id, label);
    println!("  Status: {}", report.status);
    println!(
        "  Pages: {} crawled ({} ok, {} failed, {} skipped), {} discovered",
        report.pages_crawled,
        report.pages_successful,
        report.pages_failed,
        report.pages_skipped,
        report.pages_discovered
    );
    println!(
        "  Frontier: {} pending, {} in flight",
        report.pending, report.processing
    );
    println!(
        "  Progress: {:.1}% at {:.1} pages/min",
        report.progress_percent, report.pages_per_minute
    );
    if let Some(eta) = report.eta_seconds {
        println!("  ETA: {}m {}s", eta / 60, eta % 60);
    }
    println!(
        "  Content: {} words, {} links",
        report.total_words, report.total_links
    );
    if report.error_count > 0 {
        println!(
            "  Errors: {} (last: {})",
            report.error_count,
            report.last_error.as_deref().unwrap_or("-")
        );
    }
    println!();
}
