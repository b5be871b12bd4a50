//! Rows of the durable job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobKind {
    EmptyBucket,
    CopyBucket,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::EmptyBucket => f.write_str("empty_bucket"),
            JobKind::CopyBucket => f.write_str("copy_bucket"),
        }
    }
}

#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    /// Retry budget exhausted or failed with a non-retryable error.
    Dead,
}

/// Body carried by every bucket job.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketJobPayload {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub bucket_src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_dest: Option<String>,
}

#[derive(Clone, FromRow, Debug)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    /// JSON-encoded [`BucketJobPayload`].
    pub payload: String,
    pub status: JobStatus,
    /// Attempts started so far, including the current one.
    pub attempts: i64,
    /// Retries allowed after the first attempt.
    pub max_retry: i64,
    pub timeout_secs: i64,
    pub last_error: Option<String>,
    /// Unix seconds before which the job is not claimable.
    pub run_at: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// True once the current attempt used the last allowed retry.
    pub fn retries_exhausted(&self) -> bool {
        self.attempts > self.max_retry
    }
}
