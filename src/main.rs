//! Lantern main entry point
//!
//! This is the command-line interface for the Lantern crawl engine.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use lantern_crawl::config::{load_config_with_hash, Config};
use lantern_crawl::output::print_status;
use lantern_crawl::{Coordinator, JobStatus, JobStatusReport};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Lantern: a polite crawl orchestration engine
///
/// Lantern crawls the sites described in its configuration while respecting
/// robots.txt and per-domain politeness delays. Jobs are stored in SQLite and
/// can be paused with Ctrl-C and picked up again with --resume.
#[derive(Parser, Debug)]
#[command(name = "lantern")]
#[command(version)]
#[command(about = "A polite crawl orchestration engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["status", "resume", "due"])]
    dry_run: bool,

    /// Show the status of every stored job and exit
    #[arg(long, conflicts_with_all = ["dry_run", "resume", "due"])]
    status: bool,

    /// Resume paused jobs and recover interrupted ones
    #[arg(long, conflicts_with_all = ["dry_run", "status", "due"])]
    resume: bool,

    /// Start every scheduled job that is due, then exit when they finish
    #[arg(long, conflicts_with_all = ["dry_run", "status", "resume"])]
    due: bool,

    /// Print status reports as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let coordinator = Coordinator::new(&config).context("failed to open storage")?;

    if cli.status {
        handle_status(&coordinator, cli.json)?;
    } else if cli.due {
        handle_due(&coordinator, cli.json).await?;
    } else if cli.resume {
        handle_resume(&coordinator, cli.json).await?;
    } else {
        handle_crawl(&coordinator, &config, cli.json).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence over the flags when it is set.
fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "lantern_crawl=info,lantern=info,warn",
            1 => "lantern_crawl=debug,lantern=debug,info",
            2 => "lantern_crawl=trace,lantern=trace,debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows what would be crawled
fn handle_dry_run(config: &Config) {
    println!("=== Lantern Dry Run ===\n");

    println!("Engine:");
    println!("  Fetch timeout: {}ms", config.crawler.fetch_timeout_ms);
    println!("  Max redirects: {}", config.crawler.max_redirects);
    println!("  Max response size: {} bytes", config.crawler.max_response_bytes);
    println!(
        "  Retries: {} attempts, backoff {}ms to {}ms",
        config.crawler.max_attempts, config.crawler.backoff_base_ms, config.crawler.max_backoff_ms
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Database: {}", config.storage.database_path);

    println!("\nJobs ({}):", config.jobs.len());
    for job in &config.jobs {
        println!(
            "  - {} [{}]",
            job.name.as_deref().unwrap_or("(unnamed)"),
            job.start_url
        );
        println!(
            "    max {} pages, depth {}, {} concurrent, {}ms delay",
            job.max_pages, job.max_depth, job.max_concurrent, job.request_delay_ms
        );
        if !job.include_patterns.is_empty() {
            println!("    include: {}", job.include_patterns.join(", "));
        }
        if !job.exclude_patterns.is_empty() {
            println!("    exclude: {}", job.exclude_patterns.join(", "));
        }
        if let Some(schedule) = &job.schedule {
            println!("    schedule: {:?} at {:02}:00 UTC", schedule.frequency, schedule.hour);
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --status mode: prints every stored job
fn handle_status(coordinator: &Coordinator, json: bool) -> anyhow::Result<()> {
    let reports = coordinator
        .list_jobs()?
        .iter()
        .map(|job| coordinator.get_status(job.id))
        .collect::<Result<Vec<_>, _>>()?;

    report(&reports, json)
}

/// Handles the --due mode: runs the schedule poller once
async fn handle_due(coordinator: &Coordinator, json: bool) -> anyhow::Result<()> {
    let started = coordinator.dispatch_due(Utc::now())?;
    if started.is_empty() {
        tracing::info!("No scheduled jobs are due");
        return Ok(());
    }

    run_to_completion(coordinator, &started, json).await
}

/// Handles the --resume mode: continues paused and interrupted jobs
async fn handle_resume(coordinator: &Coordinator, json: bool) -> anyhow::Result<()> {
    let mut jobs = coordinator.recover()?;
    for job in coordinator.list_jobs()? {
        if job.status == JobStatus::Paused {
            coordinator.resume(job.id)?;
            jobs.push(job.id);
        }
    }

    if jobs.is_empty() {
        tracing::info!("Nothing to resume");
        return Ok(());
    }

    run_to_completion(coordinator, &jobs, json).await
}

/// Handles the main crawl operation
async fn handle_crawl(coordinator: &Coordinator, config: &Config, json: bool) -> anyhow::Result<()> {
    let mut started = Vec::new();
    for job in &config.jobs {
        let job_id = coordinator.register_job(job)?;
        if job.schedule.is_some() {
            tracing::info!(job_id, "Registered scheduled job");
            continue;
        }
        let status = coordinator.get_job(job_id)?.status;
        if matches!(status, JobStatus::Paused | JobStatus::Running) {
            tracing::warn!(job_id, %status, "Job was interrupted; continue it with --resume");
            continue;
        }
        started.push(coordinator.launch(job_id)?);
    }

    if started.is_empty() {
        tracing::info!("No unscheduled jobs to run");
        return Ok(());
    }

    run_to_completion(coordinator, &started, json).await
}

/// Waits for jobs to settle, pausing them all on Ctrl-C
async fn run_to_completion(coordinator: &Coordinator, jobs: &[i64], json: bool) -> anyhow::Result<()> {
    let wait_all = futures::future::join_all(jobs.iter().map(|&id| coordinator.wait(id)));

    tokio::select! {
        results = wait_all => {
            for result in results {
                result?;
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::warn!("Interrupted, pausing running jobs");
            for job_id in coordinator.active_jobs()? {
                if let Err(e) = coordinator.pause(job_id) {
                    tracing::debug!(job_id, error = %e, "Job could not be paused");
                }
            }
            for job_id in jobs {
                coordinator.wait(*job_id).await?;
            }
            tracing::info!("Jobs paused; continue with --resume");
        }
    }

    let reports = jobs
        .iter()
        .map(|&id| coordinator.get_status(id))
        .collect::<Result<Vec<_>, _>>()?;
    report(&reports, json)
}

fn report(reports: &[JobStatusReport], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
    } else if reports.is_empty() {
        println!("No jobs stored");
    } else {
        reports.iter().for_each(print_status);
    }
    Ok(())
}
