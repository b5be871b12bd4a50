//! Persisted record of one asynchronous bulk bucket operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskKind {
    Empty,
    Copy,
}

#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Completed => f.write_str("completed"),
            TaskStatus::Failed => f.write_str("failed"),
        }
    }
}

/// A bulk operation as seen by the polling client.
///
/// Created in `Running` with progress 0 before the job is enqueued; only the
/// executor moves it to `Completed` or `Failed`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TaskKind,
    pub bucket_src: String,
    pub bucket_dest: Option<String>,
    pub status: TaskStatus,
    /// Percentage in `[0, 100]`, never decreasing.
    pub progress: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
