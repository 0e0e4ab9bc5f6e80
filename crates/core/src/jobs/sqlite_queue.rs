//! Durable deferred-job queue on SQLite.
//!
//! Jobs live in the `jobs` table of the same database file as the shipments.
//! Workers claim due jobs atomically (`queued -> running`), then mark them
//! `done`, requeue them with a later `run_at`, or mark them `failed`.
//!
//! A shipment has at most one `queued` job per kind. Enqueueing while one is
//! queued returns that job and moves its `run_at` earlier if needed.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{Job, JobId, JobKind, JobRequest, JobScheduler, JobState, QueueStats, SchedulerError};
use crate::shipment::{format_timestamp, parse_timestamp};

const JOB_COLUMNS: &str =
    "id, kind, shipment_id, state, run_at, attempts, max_attempts, last_error, created_at, updated_at";

/// Default number of attempts before a job is marked failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// SQLite-backed job queue.
pub struct SqliteJobQueue {
    conn: Mutex<Connection>,
    open: AtomicBool,
    max_attempts: u32,
}

impl SqliteJobQueue {
    /// Open (or create) the job queue in the database at `path`.
    pub fn new(path: &Path) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Create an in-memory job queue (useful for testing).
    pub fn in_memory() -> Result<Self, SchedulerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            open: AtomicBool::new(true),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the attempt budget given to newly enqueued jobs.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn initialize_schema(conn: &Connection) -> Result<(), SchedulerError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                shipment_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                run_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state_run_at ON jobs(state, run_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_shipment_id ON jobs(shipment_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SchedulerError> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Database("connection mutex poisoned".to_string()))
    }

    /// Stop accepting new jobs. Later `enqueue` calls fail with `Unavailable`.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Returns true if the queue accepts new jobs.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let id: i64 = row.get(0)?;
        let kind: String = row.get(1)?;
        let state: String = row.get(3)?;
        let run_at: String = row.get(4)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        let conversion = |column: usize, value: &str| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                format!("unexpected value {:?}", value).into(),
            )
        };

        Ok(Job {
            id: JobId(id),
            kind: JobKind::parse(&kind).ok_or_else(|| conversion(1, &kind))?,
            shipment_id: row.get(2)?,
            state: JobState::parse(&state).ok_or_else(|| conversion(3, &state))?,
            run_at: parse_timestamp(&run_at).ok_or_else(|| conversion(4, &run_at))?,
            attempts: row.get(5)?,
            max_attempts: row.get(6)?,
            last_error: row.get(7)?,
            created_at: parse_timestamp(&created_at).ok_or_else(|| conversion(8, &created_at))?,
            updated_at: parse_timestamp(&updated_at).ok_or_else(|| conversion(9, &updated_at))?,
        })
    }

    fn fetch(conn: &Connection, id: JobId) -> Result<Option<Job>, SchedulerError> {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
                params![id.0],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn run_at_after(now: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>, SchedulerError> {
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(SchedulerError::InvalidDelay(delay))
    }

    /// Get a job by ID.
    pub fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    /// Most recent jobs for a shipment, newest first.
    pub fn list_for_shipment(&self, shipment_id: i64, limit: i64) -> Result<Vec<Job>, SchedulerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE shipment_id = ? ORDER BY id DESC LIMIT ?",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![shipment_id, limit], Self::row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Claim up to `limit` jobs whose `run_at` is not after `now`.
    ///
    /// Claimed jobs move to `running` and their attempt counter is incremented.
    /// A job is never handed to two callers.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, SchedulerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now_str = format_timestamp(now);

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM jobs WHERE state = 'queued' AND run_at <= ? ORDER BY run_at ASC, id ASC LIMIT ?",
            )?;
            let ids = stmt
                .query_map(params![now_str, limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            tx.execute(
                "UPDATE jobs SET state = 'running', attempts = attempts + 1, updated_at = ? WHERE id = ?",
                params![now_str, id],
            )?;
            if let Some(job) = Self::fetch(&tx, JobId(id))? {
                jobs.push(job);
            }
        }

        tx.commit()?;

        if !jobs.is_empty() {
            debug!("Claimed {} due job(s)", jobs.len());
        }
        Ok(jobs)
    }

    fn set_state(&self, id: JobId, state: JobState, error: Option<&str>) -> Result<(), SchedulerError> {
        let conn = self.lock()?;
        let now = format_timestamp(Utc::now());

        let changed = conn.execute(
            "UPDATE jobs SET state = ?, last_error = COALESCE(?, last_error), updated_at = ? WHERE id = ?",
            params![state.as_str(), error, now, id.0],
        )?;

        if changed == 0 {
            return Err(SchedulerError::NotFound(id));
        }
        Ok(())
    }

    /// Mark a claimed job as finished.
    pub fn complete(&self, id: JobId) -> Result<(), SchedulerError> {
        self.set_state(id, JobState::Done, None)
    }

    /// Put a claimed job back in the queue, due after `delay`.
    ///
    /// If another job for the same shipment was queued meanwhile, that job
    /// takes over the retry and this one is closed as `done`.
    pub fn retry_later(&self, id: JobId, delay: Duration, error: &str) -> Result<(), SchedulerError> {
        let run_at = format_timestamp(Self::run_at_after(Utc::now(), delay)?);
        let now = format_timestamp(Utc::now());

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = Self::fetch(&tx, id)?.ok_or(SchedulerError::NotFound(id))?;

        match Self::queued_job_for(&tx, job.shipment_id, job.kind)? {
            Some(other) if other != id => {
                tx.execute(
                    "UPDATE jobs SET run_at = MIN(run_at, ?), last_error = ?, updated_at = ? WHERE id = ?",
                    params![run_at, error, now, other.0],
                )?;
                tx.execute(
                    "UPDATE jobs SET state = 'done', last_error = ?, updated_at = ? WHERE id = ?",
                    params![format!("superseded by job {}: {}", other, error), now, id.0],
                )?;
                debug!("Retry of job {} merged into queued job {}", id, other);
            }
            _ => {
                tx.execute(
                    "UPDATE jobs SET state = 'queued', run_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
                    params![run_at, error, now, id.0],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn queued_job_for(
        conn: &Connection,
        shipment_id: i64,
        kind: JobKind,
    ) -> Result<Option<JobId>, SchedulerError> {
        let id = conn
            .query_row(
                "SELECT id FROM jobs WHERE shipment_id = ? AND kind = ? AND state = 'queued' ORDER BY id ASC LIMIT 1",
                params![shipment_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(JobId))
    }

    /// Mark a claimed job as permanently failed.
    pub fn fail(&self, id: JobId, error: &str) -> Result<(), SchedulerError> {
        self.set_state(id, JobState::Failed, Some(error))
    }

    /// Returns true if the shipment has a queued or running job.
    pub fn has_pending(&self, shipment_id: i64) -> Result<bool, SchedulerError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE shipment_id = ? AND state IN ('queued', 'running')",
            params![shipment_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Return jobs left `running` by a previous process to the queue.
    ///
    /// Returns the number of jobs requeued. A recovered job whose shipment
    /// already has a queued job is closed instead.
    pub fn recover_running(&self) -> Result<usize, SchedulerError> {
        let now = format_timestamp(Utc::now());
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let requeued = tx.execute(
            "UPDATE jobs SET state = 'queued', updated_at = ? WHERE state = 'running'",
            params![now],
        )?;
        // Keep the oldest queued job per shipment and kind
        let collapsed = tx.execute(
            r#"UPDATE jobs SET state = 'done', last_error = 'superseded after restart', updated_at = ?
               WHERE state = 'queued' AND EXISTS (
                   SELECT 1 FROM jobs AS older
                   WHERE older.shipment_id = jobs.shipment_id
                     AND older.kind = jobs.kind
                     AND older.state = 'queued'
                     AND older.id < jobs.id
               )"#,
            params![now],
        )?;

        tx.commit()?;
        Ok(requeued.saturating_sub(collapsed))
    }

    /// Delete finished jobs last touched before `before`.
    pub fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE state IN ('done', 'failed') AND updated_at < ?",
            params![format_timestamp(before)],
        )?;
        Ok(deleted)
    }

    /// Job counts by state, with `due` computed against `now`.
    pub fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats, SchedulerError> {
        let conn = self.lock()?;
        let mut stats = QueueStats::default();

        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            match JobState::parse(&state) {
                Some(JobState::Queued) => stats.queued = count,
                Some(JobState::Running) => stats.running = count,
                Some(JobState::Done) => stats.done = count,
                Some(JobState::Failed) => stats.failed = count,
                None => {}
            }
        }

        stats.due = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state = 'queued' AND run_at <= ?",
            params![format_timestamp(now)],
            |row| row.get(0),
        )?;

        Ok(stats)
    }
}

#[async_trait]
impl JobScheduler for SqliteJobQueue {
    async fn enqueue(&self, request: JobRequest) -> Result<JobId, SchedulerError> {
        if !self.is_open() {
            return Err(SchedulerError::Unavailable("job queue is closed".to_string()));
        }

        let now = Utc::now();
        let run_at = format_timestamp(Self::run_at_after(now, request.delay)?);
        let now_str = format_timestamp(now);

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = match Self::queued_job_for(&tx, request.shipment_id, request.kind)? {
            Some(existing) => {
                tx.execute(
                    "UPDATE jobs SET run_at = MIN(run_at, ?), updated_at = ? WHERE id = ?",
                    params![run_at, now_str, existing.0],
                )?;
                debug!(
                    "Shipment {} already has queued {} job {} (delay {:?})",
                    request.shipment_id, request.kind, existing, request.delay
                );
                existing
            }
            None => {
                tx.execute(
                    "INSERT INTO jobs (kind, shipment_id, state, run_at, attempts, max_attempts, created_at, updated_at) VALUES (?, ?, 'queued', ?, 0, ?, ?, ?)",
                    params![
                        request.kind.as_str(),
                        request.shipment_id,
                        run_at,
                        self.max_attempts,
                        now_str,
                        now_str,
                    ],
                )?;
                let id = JobId(tx.last_insert_rowid());
                debug!(
                    "Enqueued {} job {} for shipment {} (delay {:?})",
                    request.kind, id, request.shipment_id, request.delay
                );
                id
            }
        };

        tx.commit()?;
        Ok(id)
    }
}
