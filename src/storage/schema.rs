//! Database schema definitions
//!
//! All timestamps are RFC 3339 UTC strings with millisecond precision, so
//! string comparison in SQL matches temporal ordering.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl job (recurring runs get their own row, pointing at the template)
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_job_id INTEGER REFERENCES jobs(id),
    name TEXT,
    owner TEXT NOT NULL,
    start_url TEXT NOT NULL,
    config_json TEXT NOT NULL,
    status TEXT NOT NULL,
    pages_discovered INTEGER NOT NULL DEFAULT 0,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    pages_successful INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    pages_skipped INTEGER NOT NULL DEFAULT 0,
    total_words INTEGER NOT NULL DEFAULT 0,
    total_links INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    error_count INTEGER NOT NULL DEFAULT 0,
    next_scheduled_run TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_name ON jobs(name);
CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs(next_scheduled_run);

-- Per-job URL frontier
CREATE TABLE IF NOT EXISTS frontier (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    url TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    domain TEXT NOT NULL,
    depth INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    parent_url TEXT,
    anchor_text TEXT,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    next_retry_at TEXT,
    error_message TEXT,
    discovered_at TEXT NOT NULL,
    finished_at TEXT,
    UNIQUE(job_id, normalized_url)
);

CREATE INDEX IF NOT EXISTS idx_frontier_job_status ON frontier(job_id, status);
CREATE INDEX IF NOT EXISTS idx_frontier_job_priority ON frontier(job_id, priority DESC, id);

-- One record per successfully fetched entry
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    entry_id INTEGER NOT NULL UNIQUE REFERENCES frontier(id),
    url TEXT NOT NULL,
    final_url TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    content_type TEXT,
    title TEXT,
    description TEXT,
    author TEXT,
    published_at TEXT,
    text_content TEXT NOT NULL,
    markdown TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    link_count INTEGER NOT NULL,
    image_count INTEGER NOT NULL,
    code_block_count INTEGER NOT NULL,
    table_count INTEGER NOT NULL,
    links_json TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    crawled_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pages_job ON pages(job_id);
CREATE INDEX IF NOT EXISTS idx_pages_hash ON pages(content_hash);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
