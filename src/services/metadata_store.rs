//! MetadataStore: equality-predicate CRUD over users, buckets, files and
//! tasks in SQLite.
//!
//! Every component that touches metadata receives a clone of this handle in
//! its constructor. Only the version flip on upload and the staged copy commit
//! run inside a transaction; everything else is a single statement.

use crate::{
    errors::{AppError, AppResult, is_unique_violation},
    models::{
        bucket::Bucket,
        file::FileRecord,
        task::{Task, TaskStatus},
        user::User,
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, access_key, secret_key, is_verified, role, created_at";
const BUCKET_COLUMNS: &str =
    "id, name, owner_id, acl, versioning_enabled, region, quota_bytes, created_at";
const FILE_COLUMNS: &str =
    "id, bucket_id, file_name, version_id, is_latest, size_bytes, content_type, etag, created_at";
const TASK_COLUMNS: &str = "id, user_id, kind, bucket_src, bucket_dest, status, progress, \
                            message, created_at, updated_at";

/// Aggregate size and count of the files stored in one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketUsage {
    pub file_count: i64,
    pub total_bytes: i64,
}

#[derive(Clone)]
pub struct MetadataStore {
    db: SqlitePool,
}

impl MetadataStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    // --- users -------------------------------------------------------------

    pub async fn insert_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, email, access_key, secret_key, is_verified, role, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.access_key)
        .bind(&user.secret_key)
        .bind(user.is_verified)
        .bind(&user.role)
        .bind(user.created_at)
        .execute(&self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::conflict("email already exists")
            } else {
                err.into()
            }
        })?;
        Ok(())
    }

    pub async fn user_by_access_key(&self, access_key: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE access_key = ?"
        ))
        .bind(access_key)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    pub async fn user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    pub async fn update_user_keys(
        &self,
        id: Uuid,
        access_key: &str,
        secret_key: &str,
    ) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET access_key = ?, secret_key = ? WHERE id = ?")
            .bind(access_key)
            .bind(secret_key)
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("user not found"));
        }
        Ok(())
    }

    // --- buckets -----------------------------------------------------------

    pub async fn bucket_by_name(&self, name: &str) -> AppResult<Option<Bucket>> {
        let bucket = sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(bucket)
    }

    pub async fn bucket_by_name_and_owner(
        &self,
        name: &str,
        owner_id: Uuid,
    ) -> AppResult<Option<Bucket>> {
        let bucket = sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE name = ? AND owner_id = ?"
        ))
        .bind(name)
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(bucket)
    }

    pub async fn buckets_for_owner(&self, owner_id: Uuid) -> AppResult<Vec<Bucket>> {
        let buckets = sqlx::query_as::<_, Bucket>(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE owner_id = ? ORDER BY name ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;
        Ok(buckets)
    }

    /// Insert a bucket row. A name collision becomes `Conflict`.
    pub async fn insert_bucket(&self, bucket: &Bucket) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO buckets (id, name, owner_id, acl, versioning_enabled, region, quota_bytes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.owner_id)
        .bind(bucket.acl)
        .bind(bucket.versioning_enabled)
        .bind(&bucket.region)
        .bind(bucket.quota_bytes)
        .bind(bucket.created_at)
        .execute(&self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::conflict(format!("bucket `{}` already exists", bucket.name))
            } else {
                err.into()
            }
        })?;
        Ok(())
    }

    pub async fn delete_bucket(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn bucket_usage(&self, bucket_id: Uuid) -> AppResult<BucketUsage> {
        let (file_count, total_bytes): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM files WHERE bucket_id = ?",
        )
        .bind(bucket_id)
        .fetch_one(&self.db)
        .await?;
        Ok(BucketUsage {
            file_count,
            total_bytes,
        })
    }

    // --- files -------------------------------------------------------------

    /// All rows of a bucket in insertion order.
    pub async fn files_in_bucket(&self, bucket_id: Uuid) -> AppResult<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE bucket_id = ? ORDER BY rowid ASC"
        ))
        .bind(bucket_id)
        .fetch_all(&self.db)
        .await?;
        Ok(files)
    }

    /// Rows for client listings, sorted by name then age.
    pub async fn list_files(&self, bucket_id: Uuid, latest_only: bool) -> AppResult<Vec<FileRecord>> {
        let filter = if latest_only { " AND is_latest = 1" } else { "" };
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE bucket_id = ?{filter}
             ORDER BY file_name ASC, created_at ASC"
        ))
        .bind(bucket_id)
        .fetch_all(&self.db)
        .await?;
        Ok(files)
    }

    pub async fn file_version(
        &self,
        bucket_id: Uuid,
        file_name: &str,
        version_id: &str,
    ) -> AppResult<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE bucket_id = ? AND file_name = ? AND version_id = ?"
        ))
        .bind(bucket_id)
        .bind(file_name)
        .bind(version_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(file)
    }

    pub async fn latest_file(&self, bucket_id: Uuid, file_name: &str) -> AppResult<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE bucket_id = ? AND file_name = ? AND is_latest = 1"
        ))
        .bind(bucket_id)
        .bind(file_name)
        .fetch_optional(&self.db)
        .await?;
        Ok(file)
    }

    /// Every stored version of one logical name.
    pub async fn file_versions(&self, bucket_id: Uuid, file_name: &str) -> AppResult<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE bucket_id = ? AND file_name = ?"
        ))
        .bind(bucket_id)
        .bind(file_name)
        .fetch_all(&self.db)
        .await?;
        Ok(files)
    }

    pub async fn has_file_named(&self, bucket_id: Uuid, file_name: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM files WHERE bucket_id = ? AND file_name = ?)",
        )
        .bind(bucket_id)
        .bind(file_name)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    /// Insert a new row, demoting every other version of the same name first
    /// when `demote_others` is set. Both happen in one transaction.
    ///
    /// A duplicate `(bucket, name, version)` becomes `Conflict`.
    pub async fn insert_file(&self, file: &FileRecord, demote_others: bool) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        if demote_others {
            sqlx::query("UPDATE files SET is_latest = 0 WHERE bucket_id = ? AND file_name = ?")
                .bind(file.bucket_id)
                .bind(&file.file_name)
                .execute(&mut *tx)
                .await?;
        }
        insert_file_row(&mut tx, file).await.map_err(|err| {
            if is_unique_violation(&err) {
                AppError::conflict(format!("file `{}` already exists", file.file_name))
            } else {
                err.into()
            }
        })?;
        tx.commit().await?;
        Ok(())
    }

    /// Commit a batch of copied rows atomically.
    ///
    /// For every row marked latest, other versions of that name already in
    /// the destination lose their latest flag inside the same transaction.
    pub async fn insert_files_batch(&self, files: &[FileRecord]) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        for file in files {
            if file.is_latest {
                sqlx::query(
                    "UPDATE files SET is_latest = 0
                     WHERE bucket_id = ? AND file_name = ? AND version_id != ?",
                )
                .bind(file.bucket_id)
                .bind(&file.file_name)
                .bind(&file.version_id)
                .execute(&mut *tx)
                .await?;
            }
            insert_file_row(&mut tx, file).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_file(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_latest(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE files SET is_latest = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    // --- tasks -------------------------------------------------------------

    pub async fn insert_task(&self, task: &Task) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO tasks (id, user_id, kind, bucket_src, bucket_dest, status, progress,
                                message, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id)
        .bind(task.user_id)
        .bind(task.kind)
        .bind(&task.bucket_src)
        .bind(&task.bucket_dest)
        .bind(task.status)
        .bind(task.progress)
        .bind(&task.message)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn task_by_id(&self, id: Uuid) -> AppResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(task)
    }

    /// Raise the progress of a running task. Lower values are ignored, so a
    /// re-executed job never makes the percentage go backwards.
    pub async fn raise_task_progress(&self, id: Uuid, progress: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET progress = MAX(progress, ?), updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(progress.clamp(0, 100))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn complete_task(&self, id: Uuid, message: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET status = ?, progress = 100, message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(TaskStatus::Completed)
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Move a task to `failed`. A task that already completed is left alone.
    pub async fn fail_task(&self, id: Uuid, message: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET status = ?, message = ?, updated_at = ?
             WHERE id = ? AND status != 'completed'",
        )
        .bind(TaskStatus::Failed)
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

async fn insert_file_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    file: &FileRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO files (id, bucket_id, file_name, version_id, is_latest, size_bytes,
                            content_type, etag, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(file.id)
    .bind(file.bucket_id)
    .bind(&file.file_name)
    .bind(&file.version_id)
    .bind(file.is_latest)
    .bind(file.size_bytes)
    .bind(&file.content_type)
    .bind(&file.etag)
    .bind(file.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
