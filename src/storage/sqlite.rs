//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::config::JobConfig;
use crate::state::{EntryStatus, JobStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CrawlJob, CrawledPage, EntryUpdate, FrontierCounts, FrontierEntry, InsertOutcome, NewEntry,
    PageCommit, ReclaimSummary,
};
use crate::CrawlError;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

const JOB_COLUMNS: &str = "id, parent_job_id, name, owner, start_url, config_json, status,
    pages_discovered, pages_crawled, pages_successful, pages_failed, pages_skipped,
    total_words, total_links, last_error, error_count, next_scheduled_run,
    created_at, started_at, finished_at, updated_at";

const ENTRY_COLUMNS: &str = "id, job_id, url, normalized_url, domain, depth, priority,
    parent_url, anchor_text, status, attempts, last_attempt_at, next_retry_at,
    error_message, discovered_at, finished_at";

const PAGE_COLUMNS: &str = "id, job_id, entry_id, url, final_url, status_code, content_type,
    title, description, author, published_at, text_content, markdown, word_count,
    link_count, image_count, code_block_count, table_count, links_json, content_hash,
    crawled_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(CrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CrawlError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, CrawlError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_jobs(&self, sql: &str, values: Vec<Value>) -> StorageResult<Vec<CrawlJob>> {
        let mut stmt = self.conn.prepare(sql)?;
        let jobs = stmt
            .query_map(params_from_iter(values), row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn job_exists(&self, job_id: i64) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM jobs WHERE id = ?1", params![job_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn get_count(row: &Row, index: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(index)?.max(0) as u64)
}

fn row_to_job(row: &Row) -> rusqlite::Result<CrawlJob> {
    let config_json: String = row.get(5)?;
    let config: JobConfig = serde_json::from_str(&config_json)
        .map_err(|e| conversion_error(5, format!("invalid job config: {}", e)))?;
    let status: String = row.get(6)?;

    Ok(CrawlJob {
        id: row.get(0)?,
        parent_job_id: row.get(1)?,
        name: row.get(2)?,
        owner: row.get(3)?,
        start_url: row.get(4)?,
        config,
        status: JobStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(6, format!("unknown job status '{}'", status)))?,
        pages_discovered: get_count(row, 7)?,
        pages_crawled: get_count(row, 8)?,
        pages_successful: get_count(row, 9)?,
        pages_failed: get_count(row, 10)?,
        pages_skipped: get_count(row, 11)?,
        total_words: get_count(row, 12)?,
        total_links: get_count(row, 13)?,
        last_error: row.get(14)?,
        error_count: get_count(row, 15)?,
        next_scheduled_run: row.get(16)?,
        created_at: row.get(17)?,
        started_at: row.get(18)?,
        finished_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

fn row_to_entry(row: &Row) -> rusqlite::Result<FrontierEntry> {
    let status: String = row.get(9)?;
    Ok(FrontierEntry {
        id: row.get(0)?,
        job_id: row.get(1)?,
        url: row.get(2)?,
        normalized_url: row.get(3)?,
        domain: row.get(4)?,
        depth: row.get(5)?,
        priority: row.get(6)?,
        parent_url: row.get(7)?,
        anchor_text: row.get(8)?,
        status: EntryStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(9, format!("unknown entry status '{}'", status)))?,
        attempts: row.get(10)?,
        last_attempt_at: row.get(11)?,
        next_retry_at: row.get(12)?,
        error_message: row.get(13)?,
        discovered_at: row.get(14)?,
        finished_at: row.get(15)?,
    })
}

fn row_to_page(row: &Row) -> rusqlite::Result<CrawledPage> {
    let links_json: String = row.get(18)?;
    let links: Vec<String> = serde_json::from_str(&links_json)
        .map_err(|e| conversion_error(18, format!("invalid link list: {}", e)))?;

    Ok(CrawledPage {
        id: row.get(0)?,
        job_id: row.get(1)?,
        entry_id: row.get(2)?,
        url: row.get(3)?,
        final_url: row.get(4)?,
        status_code: row.get(5)?,
        content_type: row.get(6)?,
        title: row.get(7)?,
        description: row.get(8)?,
        author: row.get(9)?,
        published_at: row.get(10)?,
        text_content: row.get(11)?,
        markdown: row.get(12)?,
        word_count: get_count(row, 13)?,
        link_count: get_count(row, 14)?,
        image_count: get_count(row, 15)?,
        code_block_count: get_count(row, 16)?,
        table_count: get_count(row, 17)?,
        links,
        content_hash: row.get(19)?,
        crawled_at: row.get(20)?,
    })
}

/// Inserts one discovery on an open connection or transaction
fn insert_discovery_on(
    conn: &Connection,
    job_id: i64,
    entry: &NewEntry,
    now: &str,
) -> rusqlite::Result<InsertOutcome> {
    let existing: Option<(i64, String, u32)> = conn
        .query_row(
            "SELECT id, status, priority FROM frontier WHERE job_id = ?1 AND normalized_url = ?2",
            params![job_id, entry.normalized_url],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    if let Some((id, status, priority)) = existing {
        let raisable = status == EntryStatus::Pending.to_db_string()
            && entry.skip_reason.is_none()
            && entry.priority > priority;
        if !raisable {
            return Ok(InsertOutcome::Duplicate);
        }
        conn.execute(
            "UPDATE frontier SET priority = ?1 WHERE id = ?2",
            params![entry.priority, id],
        )?;
        return Ok(InsertOutcome::PriorityRaised);
    }

    let (status, finished_at) = match entry.skip_reason {
        Some(_) => (EntryStatus::Skipped, Some(now)),
        None => (EntryStatus::Pending, None),
    };

    conn.execute(
        "INSERT INTO frontier (job_id, url, normalized_url, domain, depth, priority, parent_url,
         anchor_text, status, error_message, discovered_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            job_id,
            entry.url,
            entry.normalized_url,
            entry.domain,
            entry.depth,
            entry.priority,
            entry.parent_url,
            entry.anchor_text,
            status.to_db_string(),
            entry.skip_reason,
            now,
            finished_at,
        ],
    )?;
    let id = conn.last_insert_rowid();

    conn.execute(
        "UPDATE jobs SET pages_discovered = pages_discovered + 1, updated_at = ?2 WHERE id = ?1",
        params![job_id, now],
    )?;

    Ok(InsertOutcome::Inserted(id))
}

/// Returns the entry's job if it is still `processing` under the given claim
fn claimed_job(conn: &Connection, entry_id: i64, claim_attempt: u32) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT job_id FROM frontier WHERE id = ?1 AND status = 'processing' AND attempts = ?2",
        params![entry_id, claim_attempt],
        |row| row.get(0),
    )
    .optional()
}

impl Storage for SqliteStorage {
    // ===== Job Management =====

    fn create_job(
        &mut self,
        config: &JobConfig,
        status: JobStatus,
        parent_job_id: Option<i64>,
        now: &str,
    ) -> StorageResult<i64> {
        let config_json = serde_json::to_string(config)?;
        self.conn.execute(
            "INSERT INTO jobs (parent_job_id, name, owner, start_url, config_json, status,
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                parent_job_id,
                config.name,
                config.owner,
                config.start_url,
                config_json,
                status.to_db_string(),
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_job(&self, job_id: i64) -> StorageResult<Option<CrawlJob>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn find_job_by_name(&self, name: &str) -> StorageResult<Option<CrawlJob>> {
        let job = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs WHERE name = ?1 AND parent_job_id IS NULL
                     ORDER BY id DESC LIMIT 1",
                    JOB_COLUMNS
                ),
                params![name],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self) -> StorageResult<Vec<CrawlJob>> {
        self.query_jobs(
            &format!("SELECT {} FROM jobs ORDER BY id", JOB_COLUMNS),
            Vec::new(),
        )
    }

    fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> StorageResult<Vec<CrawlJob>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let values = statuses
            .iter()
            .map(|s| Value::Text(s.to_db_string().to_string()))
            .collect();
        self.query_jobs(
            &format!(
                "SELECT {} FROM jobs WHERE status IN ({}) ORDER BY id",
                JOB_COLUMNS, placeholders
            ),
            values,
        )
    }

    fn update_job_config(
        &mut self,
        job_id: i64,
        config: &JobConfig,
        now: &str,
    ) -> StorageResult<()> {
        let config_json = serde_json::to_string(config)?;
        let changed = self.conn.execute(
            "UPDATE jobs SET config_json = ?1, name = ?2, owner = ?3, start_url = ?4,
             updated_at = ?5 WHERE id = ?6",
            params![
                config_json,
                config.name,
                config.owner,
                config.start_url,
                now,
                job_id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    fn transition_job(
        &mut self,
        job_id: i64,
        from: &[JobStatus],
        to: JobStatus,
        now: &str,
    ) -> StorageResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 5))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE jobs SET status = ?1, updated_at = ?2,
             started_at = CASE WHEN ?1 = 'running' AND started_at IS NULL THEN ?2 ELSE started_at END,
             finished_at = CASE WHEN ?3 = 1 THEN ?2 ELSE finished_at END
             WHERE id = ?4 AND status IN ({})",
            placeholders
        );

        let mut values = vec![
            Value::Text(to.to_db_string().to_string()),
            Value::Text(now.to_string()),
            Value::Integer(i64::from(to.is_terminal())),
            Value::Integer(job_id),
        ];
        values.extend(
            from.iter()
                .map(|s| Value::Text(s.to_db_string().to_string())),
        );

        let changed = self.conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 && !self.job_exists(job_id)? {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(changed > 0)
    }

    fn set_next_scheduled_run(&mut self, job_id: i64, next: Option<&str>) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE jobs SET next_scheduled_run = ?1 WHERE id = ?2",
            params![next, job_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    fn due_scheduled_jobs(&self, now: &str) -> StorageResult<Vec<CrawlJob>> {
        self.query_jobs(
            &format!(
                "SELECT {} FROM jobs WHERE next_scheduled_run IS NOT NULL
                 AND next_scheduled_run <= ?1 ORDER BY next_scheduled_run, id",
                JOB_COLUMNS
            ),
            vec![Value::Text(now.to_string())],
        )
    }

    fn record_job_error(&mut self, job_id: i64, message: &str, now: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE jobs SET last_error = ?1, error_count = error_count + 1, updated_at = ?2
             WHERE id = ?3",
            params![message, now, job_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(job_id));
        }
        Ok(())
    }

    // ===== Frontier Management =====

    fn insert_discovery(
        &mut self,
        job_id: i64,
        entry: &NewEntry,
        now: &str,
    ) -> StorageResult<InsertOutcome> {
        let tx = self.conn.transaction()?;
        let outcome = insert_discovery_on(&tx, job_id, entry, now)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn claim_next(
        &mut self,
        job_id: i64,
        now: &str,
        ready: &mut dyn FnMut(&str) -> bool,
    ) -> StorageResult<Option<FrontierEntry>> {
        let mut lost_races: Vec<i64> = Vec::new();
        let mut blocked: Vec<String> = Vec::new();

        loop {
            let candidate = {
                let mut sql = String::from(
                    "SELECT id, domain FROM frontier
                     WHERE job_id = ?1 AND status = 'pending'
                       AND (next_retry_at IS NULL OR next_retry_at <= ?2)",
                );
                let mut values = vec![Value::Integer(job_id), Value::Text(now.to_string())];
                if !blocked.is_empty() {
                    let placeholders = (0..blocked.len())
                        .map(|i| format!("?{}", values.len() + i + 1))
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(" AND domain NOT IN ({})", placeholders));
                    values.extend(blocked.iter().cloned().map(Value::Text));
                }
                if !lost_races.is_empty() {
                    let placeholders = (0..lost_races.len())
                        .map(|i| format!("?{}", values.len() + i + 1))
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(" AND id NOT IN ({})", placeholders));
                    values.extend(lost_races.iter().copied().map(Value::Integer));
                }
                sql.push_str(" ORDER BY priority DESC, id ASC LIMIT 1");

                self.conn
                    .query_row(&sql, params_from_iter(values), |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })
                    .optional()?
            };

            let Some((entry_id, domain)) = candidate else {
                return Ok(None);
            };
            // Each domain is asked at most once per claim
            if !ready(&domain) {
                blocked.push(domain);
                continue;
            }

            // Compare-and-swap: only a still-pending entry can be claimed
            let claimed = self.conn.execute(
                "UPDATE frontier SET status = 'processing', attempts = attempts + 1,
                 last_attempt_at = ?2 WHERE id = ?1 AND status = 'pending'",
                params![entry_id, now],
            )?;

            if claimed == 1 {
                return self
                    .get_entry(entry_id)?
                    .map(Some)
                    .ok_or(StorageError::EntryNotFound(entry_id));
            }
            lost_races.push(entry_id);
        }
    }

    fn apply_entry_result(
        &mut self,
        entry_id: i64,
        claim_attempt: u32,
        update: &EntryUpdate,
        now: &str,
    ) -> StorageResult<Option<EntryStatus>> {
        let tx = self.conn.transaction()?;
        let Some(job_id) = claimed_job(&tx, entry_id, claim_attempt)? else {
            return Ok(None);
        };

        let status = match update {
            EntryUpdate::Completed => {
                tx.execute(
                    "UPDATE frontier SET status = 'completed', finished_at = ?2,
                     next_retry_at = NULL WHERE id = ?1",
                    params![entry_id, now],
                )?;
                tx.execute(
                    "UPDATE jobs SET pages_crawled = pages_crawled + 1,
                     pages_successful = pages_successful + 1, updated_at = ?2 WHERE id = ?1",
                    params![job_id, now],
                )?;
                EntryStatus::Completed
            }
            EntryUpdate::Retry {
                error,
                next_retry_at,
            } => {
                tx.execute(
                    "UPDATE frontier SET status = 'pending', next_retry_at = ?2,
                     error_message = ?3 WHERE id = ?1",
                    params![entry_id, next_retry_at, error],
                )?;
                tx.execute(
                    "UPDATE jobs SET last_error = ?2, error_count = error_count + 1,
                     updated_at = ?3 WHERE id = ?1",
                    params![job_id, error, now],
                )?;
                EntryStatus::Pending
            }
            EntryUpdate::Failed { error } => {
                tx.execute(
                    "UPDATE frontier SET status = 'failed', error_message = ?2,
                     next_retry_at = NULL, finished_at = ?3 WHERE id = ?1",
                    params![entry_id, error, now],
                )?;
                tx.execute(
                    "UPDATE jobs SET pages_crawled = pages_crawled + 1,
                     pages_failed = pages_failed + 1, last_error = ?2,
                     error_count = error_count + 1, updated_at = ?3 WHERE id = ?1",
                    params![job_id, error, now],
                )?;
                EntryStatus::Failed
            }
            EntryUpdate::Skipped { reason } => {
                tx.execute(
                    "UPDATE frontier SET status = 'skipped', error_message = ?2,
                     next_retry_at = NULL, finished_at = ?3 WHERE id = ?1",
                    params![entry_id, reason, now],
                )?;
                tx.execute(
                    "UPDATE jobs SET pages_crawled = pages_crawled + 1,
                     pages_skipped = pages_skipped + 1, updated_at = ?2 WHERE id = ?1",
                    params![job_id, now],
                )?;
                EntryStatus::Skipped
            }
        };

        tx.commit()?;
        Ok(Some(status))
    }

    fn commit_page(
        &mut self,
        entry_id: i64,
        claim_attempt: u32,
        page: &CrawledPage,
        discoveries: &[NewEntry],
        now: &str,
    ) -> StorageResult<Option<PageCommit>> {
        let links_json = serde_json::to_string(&page.links)?;
        let tx = self.conn.transaction()?;
        let Some(job_id) = claimed_job(&tx, entry_id, claim_attempt)? else {
            return Ok(None);
        };

        tx.execute(
            "INSERT INTO pages (job_id, entry_id, url, final_url, status_code, content_type,
             title, description, author, published_at, text_content, markdown, word_count,
             link_count, image_count, code_block_count, table_count, links_json, content_hash,
             crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20)",
            params![
                job_id,
                entry_id,
                page.url,
                page.final_url,
                page.status_code,
                page.content_type,
                page.title,
                page.description,
                page.author,
                page.published_at,
                page.text_content,
                page.markdown,
                page.word_count as i64,
                page.link_count as i64,
                page.image_count as i64,
                page.code_block_count as i64,
                page.table_count as i64,
                links_json,
                page.content_hash,
                page.crawled_at,
            ],
        )?;
        let page_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE frontier SET status = 'completed', finished_at = ?2, next_retry_at = NULL,
             error_message = NULL WHERE id = ?1",
            params![entry_id, now],
        )?;
        tx.execute(
            "UPDATE jobs SET pages_crawled = pages_crawled + 1,
             pages_successful = pages_successful + 1, total_words = total_words + ?2,
             total_links = total_links + ?3, updated_at = ?4 WHERE id = ?1",
            params![job_id, page.word_count as i64, page.link_count as i64, now],
        )?;

        let mut commit = PageCommit {
            page_id,
            ..PageCommit::default()
        };
        for discovery in discoveries {
            match insert_discovery_on(&tx, job_id, discovery, now)? {
                InsertOutcome::Inserted(_) => commit.inserted += 1,
                InsertOutcome::PriorityRaised => commit.priority_raised += 1,
                InsertOutcome::Duplicate => {}
            }
        }

        tx.commit()?;
        Ok(Some(commit))
    }

    fn reclaim_stale(
        &mut self,
        job_id: i64,
        cutoff: &str,
        max_attempts: u32,
        now: &str,
    ) -> StorageResult<ReclaimSummary> {
        let tx = self.conn.transaction()?;
        let message = format!("fetch abandoned after {} attempts", max_attempts);

        let failed = tx.execute(
            "UPDATE frontier SET status = 'failed', error_message = ?4, finished_at = ?5,
             next_retry_at = NULL
             WHERE job_id = ?1 AND status = 'processing' AND last_attempt_at <= ?2
               AND attempts >= ?3",
            params![job_id, cutoff, max_attempts, message, now],
        )? as u64;

        if failed > 0 {
            tx.execute(
                "UPDATE jobs SET pages_crawled = pages_crawled + ?2,
                 pages_failed = pages_failed + ?2, error_count = error_count + ?2,
                 last_error = ?3, updated_at = ?4 WHERE id = ?1",
                params![job_id, failed as i64, message, now],
            )?;
        }

        let requeued = tx.execute(
            "UPDATE frontier SET status = 'pending', error_message = 'fetch abandoned'
             WHERE job_id = ?1 AND status = 'processing' AND last_attempt_at <= ?2",
            params![job_id, cutoff],
        )? as u64;

        tx.commit()?;
        Ok(ReclaimSummary { requeued, failed })
    }

    fn discard_pending(&mut self, job_id: i64, reason: &str, now: &str) -> StorageResult<u64> {
        let discarded = self.conn.execute(
            "UPDATE frontier SET status = 'skipped', error_message = ?2, finished_at = ?3,
             next_retry_at = NULL
             WHERE job_id = ?1 AND status IN ('pending', 'processing')",
            params![job_id, reason, now],
        )?;
        Ok(discarded as u64)
    }

    fn get_entry(&self, entry_id: i64) -> StorageResult<Option<FrontierEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {} FROM frontier WHERE id = ?1", ENTRY_COLUMNS),
                params![entry_id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn list_entries(
        &self,
        job_id: i64,
        status: Option<EntryStatus>,
    ) -> StorageResult<Vec<FrontierEntry>> {
        let entries = match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM frontier WHERE job_id = ?1 AND status = ?2
                     ORDER BY priority DESC, id ASC",
                    ENTRY_COLUMNS
                ))?;
                let rows = stmt.query_map(params![job_id, status.to_db_string()], row_to_entry)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM frontier WHERE job_id = ?1 ORDER BY priority DESC, id ASC",
                    ENTRY_COLUMNS
                ))?;
                let rows = stmt.query_map(params![job_id], row_to_entry)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(entries)
    }

    fn frontier_counts(&self, job_id: i64, since: &str) -> StorageResult<FrontierCounts> {
        let mut counts = FrontierCounts::default();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM frontier WHERE job_id = ?1 GROUP BY status")?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((row.get::<_, String>(0)?, get_count(row, 1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            match EntryStatus::from_db_string(&status) {
                Some(EntryStatus::Pending) => counts.pending = count,
                Some(EntryStatus::Processing) => counts.processing = count,
                Some(EntryStatus::Completed) => counts.completed = count,
                Some(EntryStatus::Failed) => counts.failed = count,
                Some(EntryStatus::Skipped) => counts.skipped = count,
                None => {
                    return Err(StorageError::Corrupt(format!(
                        "unknown entry status '{}'",
                        status
                    )))
                }
            }
        }

        counts.recent_completions = self.conn.query_row(
            "SELECT COUNT(*) FROM frontier
             WHERE job_id = ?1 AND status = 'completed' AND finished_at >= ?2",
            params![job_id, since],
            |row| get_count(row, 0),
        )?;

        Ok(counts)
    }

    fn next_retry_at(&self, job_id: i64) -> StorageResult<Option<String>> {
        let next: Option<String> = self.conn.query_row(
            "SELECT MIN(next_retry_at) FROM frontier
             WHERE job_id = ?1 AND status = 'pending' AND next_retry_at IS NOT NULL",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    // ===== Pages =====

    fn get_pages(&self, job_id: i64) -> StorageResult<Vec<CrawledPage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pages WHERE job_id = ?1 ORDER BY id",
            PAGE_COLUMNS
        ))?;
        let pages = stmt
            .query_map(params![job_id], row_to_page)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }
}
