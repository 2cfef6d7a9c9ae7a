//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and drive whole jobs
//! through the coordinator: seeding, fetching, link discovery, robots.txt,
//! retries, page bounds, pause/resume, cancellation and scheduled runs.
//! Politeness tests record when each request reached the server.

use chrono::{Duration as ChronoDuration, Utc};
use lantern_crawl::config::{
    CrawlerConfig, Frequency, JobConfig, ScheduleConfig, UserAgentConfig,
};
use lantern_crawl::crawler::{Coordinator, ROBOTS_SKIP_REASON};
use lantern_crawl::state::{EntryStatus, JobStatus};
use lantern_crawl::storage::{db_timestamp, lock, NewEntry, SharedStorage, SqliteStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

/// Engine settings with short timings for testing
fn test_settings() -> CrawlerConfig {
    CrawlerConfig {
        fetch_timeout_ms: 5_000,
        max_attempts: 3,
        backoff_base_ms: 10,
        max_backoff_ms: 50,
        scheduling_tick_ms: 10,
        cancel_grace_ms: 50,
        ..CrawlerConfig::default()
    }
}

fn create_coordinator() -> Coordinator {
    create_coordinator_with(test_settings())
}

fn create_coordinator_with(settings: CrawlerConfig) -> Coordinator {
    let storage: SharedStorage = Arc::new(Mutex::new(
        SqliteStorage::new_in_memory().expect("Failed to open in-memory storage"),
    ));
    Coordinator::with_storage(settings, &user_agent(), storage)
        .expect("Failed to build coordinator")
}

/// A job for the mock server with no politeness delay
fn create_test_job(server: &MockServer) -> JobConfig {
    let mut job = JobConfig::new(format!("{}/", server.uri()));
    job.request_delay_ms = 0;
    job.max_concurrent = 4;
    job.max_pages = 50;
    job.max_depth = 3;
    job
}

fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into().into_bytes(), "text/html")
}

fn page(title: &str, links: &[&str]) -> ResponseTemplate {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">{}</a>"#, href, href))
        .collect();
    html(format!(
        "<html><head><title>{}</title></head><body><h1>{}</h1><p>Some words about {}.</p>{}</body></html>",
        title, title, title, anchors
    ))
}

async fn mount_page(server: &MockServer, route: &str, response: ResponseTemplate, expected: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

async fn run_job(coordinator: &Coordinator, job: &JobConfig) -> (i64, JobStatus) {
    let job_id = coordinator.create_job(job).expect("Failed to create job");
    coordinator.start_job(job_id).expect("Failed to start job");
    let status = tokio::time::timeout(Duration::from_secs(20), coordinator.wait(job_id))
        .await
        .expect("Job did not settle in time")
        .expect("Failed to wait for job");
    (job_id, status)
}

type Hits = Arc<Mutex<Vec<Instant>>>;

/// Records the arrival time of every request it answers
///
/// Responses are served in order; the last one repeats.
struct Recorded {
    hits: Hits,
    served: AtomicUsize,
    responses: Vec<ResponseTemplate>,
}

impl Recorded {
    fn new(hits: &Hits, response: ResponseTemplate) -> Self {
        Self::sequence(hits, vec![response])
    }

    fn sequence(hits: &Hits, responses: Vec<ResponseTemplate>) -> Self {
        Self {
            hits: Arc::clone(hits),
            served: AtomicUsize::new(0),
            responses,
        }
    }
}

impl Respond for Recorded {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.hits.lock().unwrap().push(Instant::now());
        let n = self.served.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

fn sorted_hits(hits: &Hits) -> Vec<Instant> {
    let mut hits = hits.lock().unwrap().clone();
    hits.sort();
    hits
}

/// Smallest time between two consecutive requests
fn min_gap(hits: &Hits) -> Duration {
    sorted_hits(hits)
        .windows(2)
        .map(|w| w[1] - w[0])
        .min()
        .expect("at least two requests")
}

/// Most requests whose first `hold` overlapped at any arrival
fn peak_overlap(hits: &Hits, hold: Duration) -> usize {
    let hits = sorted_hits(hits);
    hits.iter()
        .map(|&at| hits.iter().filter(|&&other| other <= at && at < other + hold).count())
        .max()
        .unwrap_or(0)
}

/// Serves an endless chain of pages: `/n/k` links to `/n/2k` and `/n/2k+1`
struct EndlessGraph;

impl Respond for EndlessGraph {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let k: u64 = request
            .url
            .path()
            .trim_start_matches("/n/")
            .parse()
            .unwrap_or(1);
        let first = format!("/n/{}", k * 2);
        let second = format!("/n/{}", k * 2 + 1);
        page(&format!("Node {}", k), &[&first, &second])
    }
}

#[tokio::test]
async fn test_full_crawl_single_site() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .mount(&server)
        .await;

    mount_page(&server, "/", page("Home", &["/a", "/b", "#top", "mailto:x@example.com"]), 1).await;
    mount_page(&server, "/a", page("A", &["/b", "/c?utm_source=feed"]), 1).await;
    mount_page(&server, "/b", page("B", &["/"]), 1).await;
    mount_page(&server, "/c", page("C", &[]), 1).await;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Completed);

    let job = coordinator.get_job(job_id).unwrap();
    assert_eq!(job.pages_discovered, 4);
    assert_eq!(job.pages_crawled, 4);
    assert_eq!(job.pages_successful, 4);
    assert_eq!(job.pages_failed, 0);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());

    let pages = coordinator.get_successful_pages(job_id).unwrap();
    assert_eq!(pages.len(), 4);
    assert_eq!(pages[0].title.as_deref(), Some("Home"));
    for page in &pages {
        assert_eq!(page.status_code, 200);
        assert!(page.word_count > 0);
        assert_eq!(page.content_hash.len(), 64);
    }
    assert!(pages.iter().any(|p| p.title.as_deref() == Some("C")));

    // Tracking parameters are not part of the dedup key
    let entries = coordinator.list_queue(job_id, None).unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries
        .iter()
        .any(|e| e.normalized_url == format!("{}/c", server.uri())));

    let report = coordinator.get_status(job_id).unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.pending, 0);
    assert_eq!(report.progress_percent, 100.0);
    assert_eq!(report.eta_seconds, None);
}

#[tokio::test]
async fn test_robots_disallowed_links_are_never_fetched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    mount_page(&server, "/", page("Home", &["/public", "/private/secret"]), 1).await;
    mount_page(&server, "/public", page("Public", &["/private/other"]), 1).await;
    mount_page(&server, "/private/secret", page("Secret", &[]), 0).await;
    mount_page(&server, "/private/other", page("Other", &[]), 0).await;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Completed);

    let skipped = coordinator
        .list_queue(job_id, Some(EntryStatus::Skipped))
        .unwrap();
    assert_eq!(skipped.len(), 2);
    for entry in &skipped {
        assert!(entry.url.contains("/private/"));
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.error_message.as_deref(), Some(ROBOTS_SKIP_REASON));
    }

    let job = coordinator.get_job(job_id).unwrap();
    assert_eq!(job.pages_discovered, 4);
    assert_eq!(job.pages_crawled, 2);
    assert_eq!(job.pages_skipped, 0);
}

#[tokio::test]
async fn test_page_and_depth_bounds() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        page("Home", &["/p1", "/p2", "/p3", "/p4", "/p5", "/p6"]),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d$"))
        .respond_with(page("Leaf", &["/deep/1", "/deep/2"]))
        .mount(&server)
        .await;
    mount_page(&server, "/deep/1", page("Deep", &[]), 0).await;

    let mut job = create_test_job(&server);
    job.max_pages = 3;
    job.max_depth = 1;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &job).await;
    assert_eq!(status, JobStatus::Completed);

    let job = coordinator.get_job(job_id).unwrap();
    assert_eq!(job.pages_crawled, 3);
    assert!(job.pages_discovered >= 6);

    let entries = coordinator.list_queue(job_id, None).unwrap();
    assert!(entries.iter().all(|e| e.depth <= 1));
    let pending = coordinator
        .list_queue(job_id, Some(EntryStatus::Pending))
        .unwrap();
    assert_eq!(pending.len(), 4);
    assert_eq!(coordinator.get_successful_pages(job_id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_page_bound_on_endless_site() {
    let server = MockServer::start().await;
    mount_page(&server, "/", page("Root", &["/n/1"]), 1).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/n/\d+$"))
        .respond_with(EndlessGraph)
        .mount(&server)
        .await;

    let mut job = create_test_job(&server);
    job.max_pages = 5;
    job.max_depth = 100;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &job).await;
    assert_eq!(status, JobStatus::Completed);

    let job = coordinator.get_job(job_id).unwrap();
    assert_eq!(job.pages_crawled, 5);
    assert_eq!(coordinator.get_successful_pages(job_id).unwrap().len(), 5);

    let requests = server.received_requests().await.unwrap_or_default();
    let page_requests = requests
        .iter()
        .filter(|r| r.url.path() != "/robots.txt")
        .count();
    assert_eq!(page_requests, 5);
}

#[tokio::test]
async fn test_persistent_server_error_fails_job_after_retries() {
    let server = MockServer::start().await;
    mount_page(&server, "/", ResponseTemplate::new(500), 3).await;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Failed);

    let entries = coordinator.list_queue(job_id, None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, EntryStatus::Failed);
    assert_eq!(entries[0].attempts, 3);

    let job = coordinator.get_job(job_id).unwrap();
    assert_eq!(job.pages_crawled, 1);
    assert_eq!(job.pages_failed, 1);
    assert_eq!(job.pages_successful, 0);
    assert!(job.error_count >= 3);
    assert!(job.last_error.is_some());
}

#[tokio::test]
async fn test_transient_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(page("Home", &[]))
        .mount(&server)
        .await;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Completed);

    let entries = coordinator.list_queue(job_id, None).unwrap();
    assert_eq!(entries[0].status, EntryStatus::Completed);
    assert_eq!(entries[0].attempts, 2);

    let job = coordinator.get_job(job_id).unwrap();
    assert_eq!(job.pages_successful, 1);
    assert_eq!(job.pages_failed, 0);
    assert_eq!(job.error_count, 1);
}

#[tokio::test]
async fn test_unsupported_content_type_is_not_stored() {
    let server = MockServer::start().await;
    mount_page(&server, "/", page("Home", &["/report.pdf"]), 1).await;
    mount_page(
        &server,
        "/report.pdf",
        ResponseTemplate::new(200).set_body_raw(b"%PDF-1.4".to_vec(), "application/pdf"),
        1,
    )
    .await;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Completed);

    let failed = coordinator
        .list_queue(job_id, Some(EntryStatus::Failed))
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 1);
    assert_eq!(coordinator.get_successful_pages(job_id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_pause_and_resume_without_refetching() {
    let server = MockServer::start().await;

    let links: Vec<String> = (1..=10).map(|i| format!("/slow/{}", i)).collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    mount_page(&server, "/", page("Home", &link_refs), 1).await;
    for link in &links {
        mount_page(
            &server,
            link,
            page("Slow", &[]).set_delay(Duration::from_millis(100)),
            1,
        )
        .await;
    }

    let mut job = create_test_job(&server);
    job.max_concurrent = 2;

    let coordinator = create_coordinator();
    let job_id = coordinator.create_job(&job).unwrap();
    coordinator.start_job(job_id).unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    coordinator.pause(job_id).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), coordinator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Paused);

    let paused = coordinator.get_status(job_id).unwrap();
    assert_eq!(paused.processing, 0);
    assert!(paused.pending > 0);

    // Nothing is fetched while paused
    tokio::time::sleep(Duration::from_millis(200)).await;
    let still_paused = coordinator.get_job(job_id).unwrap();
    assert_eq!(still_paused.status, JobStatus::Paused);
    assert_eq!(still_paused.pages_crawled, paused.pages_crawled);

    coordinator.resume(job_id).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(20), coordinator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Completed);

    let job = coordinator.get_job(job_id).unwrap();
    assert_eq!(job.pages_crawled, 11);
    assert_eq!(job.pages_successful, 11);
}

#[tokio::test]
async fn test_cancel_discards_remaining_work() {
    let server = MockServer::start().await;

    let links: Vec<String> = (1..=10).map(|i| format!("/slow/{}", i)).collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    mount_page(&server, "/", page("Home", &link_refs), 1).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/slow/\d+$"))
        .respond_with(page("Slow", &[]).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let mut job = create_test_job(&server);
    job.max_concurrent = 1;

    let coordinator = create_coordinator();
    let job_id = coordinator.create_job(&job).unwrap();
    coordinator.start_job(job_id).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    coordinator.cancel(job_id).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), coordinator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Cancelled);

    let report = coordinator.get_status(job_id).unwrap();
    assert_eq!(report.pending, 0);
    assert_eq!(report.processing, 0);
    assert!(report.pages_crawled < 11);

    assert!(matches!(
        coordinator.resume(job_id),
        Err(lantern_crawl::CrawlError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_dispatch_due_starts_scheduled_run() {
    let server = MockServer::start().await;
    mount_page(&server, "/", page("Home", &[]), 1).await;

    let mut job = create_test_job(&server);
    job.name = Some("nightly".to_string());
    job.schedule = Some(ScheduleConfig {
        frequency: Frequency::Daily,
        hour: 2,
        day_of_week: None,
        day_of_month: None,
    });

    let coordinator = create_coordinator();
    let template = coordinator.register_job(&job).unwrap();
    assert_eq!(coordinator.get_job(template).unwrap().status, JobStatus::Idle);

    let now = Utc::now();
    let past = db_timestamp(now - ChronoDuration::minutes(1));
    lock(coordinator.storage())
        .unwrap()
        .set_next_scheduled_run(template, Some(&past))
        .unwrap();

    let started = coordinator.dispatch_due(now).unwrap();
    assert_eq!(started.len(), 1);
    let run_id = started[0];
    assert_ne!(run_id, template);

    let run = coordinator.get_job(run_id).unwrap();
    assert_eq!(run.parent_job_id, Some(template));

    let status = tokio::time::timeout(Duration::from_secs(20), coordinator.wait(run_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Completed);

    let template_job = coordinator.get_job(template).unwrap();
    assert_eq!(template_job.status, JobStatus::Idle);
    let next = template_job.next_scheduled_run.expect("next run is scheduled");
    assert!(next > db_timestamp(now));

    // Not due again until the next run time
    assert!(coordinator.dispatch_due(now).unwrap().is_empty());
}

#[tokio::test]
async fn test_launch_finished_job_creates_new_run() {
    let server = MockServer::start().await;
    mount_page(&server, "/", page("Home", &[]), 2).await;

    let coordinator = create_coordinator();
    let (first, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Completed);

    let second = coordinator.launch(first).unwrap();
    assert_ne!(first, second);
    assert_eq!(coordinator.get_job(second).unwrap().parent_job_id, Some(first));

    let status = tokio::time::timeout(Duration::from_secs(20), coordinator.wait(second))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(coordinator.get_successful_pages(second).unwrap().len(), 1);
}

#[tokio::test]
async fn test_recover_restarts_interrupted_job() {
    let server = MockServer::start().await;
    mount_page(&server, "/", page("Home", &["/next"]), 1).await;
    mount_page(&server, "/next", page("Next", &[]), 1).await;

    let coordinator = create_coordinator();
    let job_id = coordinator.create_job(&create_test_job(&server)).unwrap();

    // A previous process marked the job running and then went away
    let now = db_timestamp(Utc::now());
    assert!(lock(coordinator.storage())
        .unwrap()
        .transition_job(job_id, &[JobStatus::Idle], JobStatus::Running, &now)
        .unwrap());

    assert_eq!(coordinator.recover().unwrap(), vec![job_id]);
    let status = tokio::time::timeout(Duration::from_secs(20), coordinator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(coordinator.get_job(job_id).unwrap().pages_successful, 2);
}

#[tokio::test]
async fn test_request_delay_spaces_requests() {
    let server = MockServer::start().await;
    let hits = Hits::default();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(Recorded::new(&hits, page("Home", &["/p/1", "/p/2", "/p/3", "/p/4"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d$"))
        .respond_with(Recorded::new(&hits, page("Leaf", &[])))
        .mount(&server)
        .await;

    let mut job = create_test_job(&server);
    job.request_delay_ms = 300;

    let coordinator = create_coordinator();
    let (_, status) = run_job(&coordinator, &job).await;
    assert_eq!(status, JobStatus::Completed);

    assert_eq!(hits.lock().unwrap().len(), 5);
    let gap = min_gap(&hits);
    assert!(gap >= Duration::from_millis(250), "requests {:?} apart", gap);
}

#[tokio::test]
async fn test_robots_crawl_delay_spaces_requests() {
    let server = MockServer::start().await;
    let hits = Hits::default();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 1\nAllow: /"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(Recorded::new(&hits, page("Home", &["/d/1", "/d/2"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/d/\d$"))
        .respond_with(Recorded::new(&hits, page("Leaf", &[])))
        .mount(&server)
        .await;

    let coordinator = create_coordinator();
    let (_, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Completed);

    assert_eq!(hits.lock().unwrap().len(), 3);
    let gap = min_gap(&hits);
    assert!(gap >= Duration::from_millis(950), "requests {:?} apart", gap);
}

#[tokio::test]
async fn test_in_flight_fetches_stay_within_max_concurrent() {
    let server = MockServer::start().await;
    let hits = Hits::default();

    let links: Vec<String> = (1..=8).map(|i| format!("/c/{}", i)).collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    mount_page(&server, "/", page("Home", &link_refs), 1).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/c/\d$"))
        .respond_with(Recorded::new(
            &hits,
            page("Slow", &[]).set_delay(Duration::from_millis(200)),
        ))
        .expect(8)
        .mount(&server)
        .await;

    let mut job = create_test_job(&server);
    job.max_concurrent = 2;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &job).await;
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(coordinator.get_job(job_id).unwrap().pages_successful, 9);

    // Each response is held for 200ms, so requests within 150ms of each other overlapped
    assert_eq!(peak_overlap(&hits, Duration::from_millis(150)), 2);
}

#[tokio::test]
async fn test_rate_limit_cools_down_domain() {
    let server = MockServer::start().await;
    let hits = Hits::default();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(Recorded::sequence(
            &hits,
            vec![
                ResponseTemplate::new(429).insert_header("Retry-After", "1"),
                page("Home", &[]),
            ],
        ))
        .expect(2)
        .mount(&server)
        .await;

    let coordinator = create_coordinator();
    let (job_id, status) = run_job(&coordinator, &create_test_job(&server)).await;
    assert_eq!(status, JobStatus::Completed);

    let gap = min_gap(&hits);
    assert!(gap >= Duration::from_millis(950), "retried after {:?}", gap);

    let entries = coordinator.list_queue(job_id, None).unwrap();
    assert_eq!(entries[0].status, EntryStatus::Completed);
    assert_eq!(entries[0].attempts, 2);
}

#[tokio::test]
async fn test_two_jobs_share_domain_spacing() {
    let server = MockServer::start().await;
    let hits = Hits::default();

    for (root, links) in [("/a/", ["/a/1", "/a/2"]), ("/b/", ["/b/1", "/b/2"])] {
        Mock::given(method("GET"))
            .and(path(root))
            .respond_with(Recorded::new(&hits, page(root, &links)))
            .mount(&server)
            .await;
        for link in links {
            Mock::given(method("GET"))
                .and(path(link))
                .respond_with(Recorded::new(&hits, page(link, &[])))
                .expect(1)
                .mount(&server)
                .await;
        }
    }

    let coordinator = create_coordinator();
    let mut jobs = Vec::new();
    for root in ["/a/", "/b/"] {
        let mut job = create_test_job(&server);
        job.start_url = format!("{}{}", server.uri(), root);
        job.request_delay_ms = 300;
        let job_id = coordinator.create_job(&job).unwrap();
        jobs.push(job_id);
    }
    for &job_id in &jobs {
        coordinator.start_job(job_id).unwrap();
    }

    for &job_id in &jobs {
        let status = tokio::time::timeout(Duration::from_secs(20), coordinator.wait(job_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(coordinator.get_job(job_id).unwrap().pages_successful, 3);
    }

    assert_eq!(hits.lock().unwrap().len(), 6);
    let gap = min_gap(&hits);
    assert!(gap >= Duration::from_millis(250), "requests {:?} apart", gap);

    let domain = coordinator.list_queue(jobs[0], None).unwrap()[0].domain.clone();
    assert_eq!(coordinator.politeness().request_count(&domain), 6);
}

#[tokio::test]
async fn test_watchdog_requeues_orphaned_entry() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        page("Home", &[]).set_delay(Duration::from_millis(300)),
        1,
    )
    .await;
    mount_page(&server, "/orphan", page("Orphan", &[]), 1).await;

    // Stale claims are reclaimed after 2x fetch timeout plus one watchdog period
    let settings = CrawlerConfig {
        fetch_timeout_ms: 1_000,
        ..test_settings()
    };
    let coordinator = create_coordinator_with(settings);
    let job_id = coordinator.create_job(&create_test_job(&server)).unwrap();
    coordinator.start_job(job_id).unwrap();

    let mut in_flight = false;
    for _ in 0..100 {
        if coordinator.get_status(job_id).unwrap().processing == 1 {
            in_flight = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(in_flight, "seed was never claimed");

    // An entry claimed an hour ago by a task that no longer exists
    let seed = coordinator.list_queue(job_id, None).unwrap().remove(0);
    let orphan_url = format!("{}/orphan", server.uri());
    let long_ago = db_timestamp(Utc::now() - ChronoDuration::hours(1));
    {
        let mut storage = lock(coordinator.storage()).unwrap();
        storage
            .insert_discovery(
                job_id,
                &NewEntry {
                    url: orphan_url.clone(),
                    normalized_url: orphan_url.clone(),
                    domain: seed.domain.clone(),
                    depth: 1,
                    priority: 50,
                    parent_url: Some(seed.url.clone()),
                    anchor_text: None,
                    skip_reason: None,
                },
                &long_ago,
            )
            .unwrap();
        let orphan = storage
            .claim_next(job_id, &long_ago, &mut |_| true)
            .unwrap()
            .expect("orphan claimed");
        assert_eq!(orphan.url, orphan_url);
    }

    let status = tokio::time::timeout(Duration::from_secs(20), coordinator.wait(job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Completed);

    let orphan = coordinator
        .list_queue(job_id, None)
        .unwrap()
        .into_iter()
        .find(|e| e.url == orphan_url)
        .expect("orphan entry");
    assert_eq!(orphan.status, EntryStatus::Completed);
    assert_eq!(orphan.attempts, 2);
    assert_eq!(coordinator.get_job(job_id).unwrap().pages_successful, 2);
}
