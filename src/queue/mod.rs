//! Durable job queue on top of the `jobs` table.
//!
//! Delivery is at least once: a job is claimed by flipping it to `running`
//! in a single statement, and anything still `running` when the process
//! starts again goes back to `pending`.

use crate::{
    errors::AppResult,
    models::job::{BucketJobPayload, Job, JobKind, JobStatus},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod worker_pool;

const JOB_COLUMNS: &str = "id, kind, payload, status, attempts, max_retry, timeout_secs, \
                           last_error, run_at, created_at, updated_at";
const MAX_BACKOFF_SECS: i64 = 60;

/// Retry budget and per-attempt time limit for one class of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub max_retry: u32,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct JobQueue {
    db: SqlitePool,
    // Serializes claims from this process so workers do not fight over the
    // SQLite write lock on every poll.
    claim_lock: Arc<Mutex<()>>,
}

impl JobQueue {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            claim_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn enqueue(
        &self,
        kind: JobKind,
        payload: &BucketJobPayload,
        opts: EnqueueOptions,
    ) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let body = serde_json::to_string(payload)?;
        sqlx::query(
            "INSERT INTO jobs (id, kind, payload, status, attempts, max_retry, timeout_secs,
                               last_error, run_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(id)
        .bind(kind)
        .bind(body)
        .bind(JobStatus::Pending)
        .bind(i64::from(opts.max_retry))
        .bind(opts.timeout.as_secs() as i64)
        .bind(now.timestamp())
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        tracing::debug!(job_id = %id, kind = %kind, task_id = %payload.task_id, "job enqueued");
        Ok(id)
    }

    /// Claim the oldest pending job that is due at `now`, counting the
    /// attempt. Returns `None` when nothing is claimable.
    pub async fn claim_next(&self, now: i64) -> AppResult<Option<Job>> {
        let _guard = self.claim_lock.lock().await;
        let job = sqlx::query_as::<_, Job>(&format!(
            "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?
             WHERE status = 'pending' AND id = (
                 SELECT id FROM jobs
                 WHERE status = 'pending' AND run_at <= ?
                 ORDER BY run_at ASC, rowid ASC
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(job)
    }

    pub async fn complete(&self, id: Uuid) -> AppResult<()> {
        self.set_final(id, JobStatus::Done, None).await
    }

    /// Put a failed attempt back in line, claimable again at `run_at`.
    pub async fn retry_later(&self, id: Uuid, error: &str, run_at: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'pending', last_error = ?, run_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(run_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Give up on a job for good.
    pub async fn bury(&self, id: Uuid, error: &str) -> AppResult<()> {
        self.set_final(id, JobStatus::Dead, Some(error)).await
    }

    /// Return jobs left `running` by a previous process to `pending`.
    pub async fn requeue_stale(&self) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', run_at = ?, updated_at = ? WHERE status = 'running'",
        )
        .bind(Utc::now().timestamp())
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn job_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(job)
    }

    async fn set_final(&self, id: Uuid, status: JobStatus, error: Option<&str>) -> AppResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, last_error = COALESCE(?, last_error), updated_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// Delay before retrying after `attempts` failed attempts: `2^attempts`
/// seconds, at most a minute.
pub fn backoff_secs(attempts: i64) -> i64 {
    let exp = attempts.clamp(0, 6) as u32;
    (1_i64 << exp).min(MAX_BACKOFF_SECS)
}
