//! TaskExecutor: runs the bulk bucket jobs claimed by the worker pool.
//!
//! Both handlers can be re-run from the start after a failed attempt:
//! emptying only ever deletes what is still there, and copying skips every
//! `(name, version)` the destination already holds.

use crate::{
    errors::{AppError, AppResult},
    models::{
        bucket::Bucket,
        file::FileRecord,
        job::{BucketJobPayload, JobKind},
    },
    services::{
        blob_store::BlobStore, metadata_store::MetadataStore,
        task_dispatcher::resolve_or_create_destination,
    },
};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskExecutor {
    store: MetadataStore,
    blobs: BlobStore,
}

impl TaskExecutor {
    pub fn new(store: MetadataStore, blobs: BlobStore) -> Self {
        Self { store, blobs }
    }

    pub async fn execute(&self, kind: JobKind, payload: &BucketJobPayload) -> AppResult<()> {
        match kind {
            JobKind::EmptyBucket => self.empty_bucket(payload).await,
            JobKind::CopyBucket => self.copy_bucket(payload).await,
        }
    }

    /// Called once the queue has given up on a job.
    pub async fn on_exhausted(&self, payload: &BucketJobPayload, cause: &str) {
        if let Err(err) = self.store.fail_task(payload.task_id, cause).await {
            error!(task_id = %payload.task_id, error = %err, "failed to mark task failed");
        }
    }

    async fn source_bucket(&self, payload: &BucketJobPayload) -> AppResult<Bucket> {
        self.store
            .bucket_by_name_and_owner(&payload.bucket_src, payload.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("bucket not found or not owned by user"))
    }

    async fn empty_bucket(&self, payload: &BucketJobPayload) -> AppResult<()> {
        let task_id = payload.task_id;
        let bucket = self.source_bucket(payload).await?;
        let files = self.store.files_in_bucket(bucket.id).await?;
        let total = files.len();
        info!(task_id = %task_id, bucket = %bucket.name, total, "emptying bucket");

        for (i, file) in files.iter().enumerate() {
            if !self.blobs.delete(&bucket.name, &file.physical_name()).await? {
                debug!(bucket = %bucket.name, file = %file.file_name, "payload already missing");
            }
            self.store.delete_file(file.id).await?;
            self.store
                .raise_task_progress(task_id, progress_percent(i + 1, total))
                .await?;
        }

        self.store
            .complete_task(task_id, &format!("removed {total} files from `{}`", bucket.name))
            .await?;
        info!(task_id = %task_id, bucket = %bucket.name, total, "bucket emptied");
        Ok(())
    }

    async fn copy_bucket(&self, payload: &BucketJobPayload) -> AppResult<()> {
        let task_id = payload.task_id;
        let src = self.source_bucket(payload).await?;
        let dest_name = payload
            .bucket_dest
            .as_deref()
            .ok_or_else(|| AppError::validation("copy job without destination bucket"))?;
        let dest = resolve_or_create_destination(&self.store, &src, dest_name).await?;
        self.blobs.ensure_bucket_dir(&dest.name).await?;

        let files = self.store.files_in_bucket(src.id).await?;
        let present: HashSet<(String, String)> = self
            .store
            .files_in_bucket(dest.id)
            .await?
            .into_iter()
            .map(|f| (f.file_name, f.version_id))
            .collect();
        let total = files.len();
        info!(task_id = %task_id, src = %src.name, dest = %dest.name, total, "copying bucket");

        let mut staged: Vec<FileRecord> = Vec::new();
        for (i, file) in files.iter().enumerate() {
            let step = async {
                if !present.contains(&(file.file_name.clone(), file.version_id.clone())) {
                    staged.push(self.stage_copy(&src, &dest, file).await?);
                }
                // 100 is left to `complete_task`, after the commit.
                self.store
                    .raise_task_progress(task_id, progress_percent(i + 1, total).min(99))
                    .await
            };
            if let Err(err) = step.await {
                self.discard_staged(&dest, &staged).await;
                return Err(err);
            }
        }

        if let Err(err) = self.store.insert_files_batch(&staged).await {
            self.discard_staged(&dest, &staged).await;
            return Err(err);
        }

        let skipped = total - staged.len();
        self.store
            .complete_task(
                task_id,
                &format!(
                    "copied {} files from `{}` to `{}` ({skipped} already present)",
                    staged.len(),
                    src.name,
                    dest.name
                ),
            )
            .await?;
        info!(task_id = %task_id, src = %src.name, dest = %dest.name, copied = staged.len(), skipped, "bucket copied");
        Ok(())
    }

    /// Copy one payload and build the row that will describe it in `dest`.
    async fn stage_copy(&self, src: &Bucket, dest: &Bucket, file: &FileRecord) -> AppResult<FileRecord> {
        let physical = file.physical_name();
        let data = self.blobs.read(&src.name, &physical).await?;
        let written = self.blobs.write(&dest.name, &physical, data).await?;
        Ok(FileRecord {
            id: Uuid::new_v4(),
            bucket_id: dest.id,
            file_name: file.file_name.clone(),
            version_id: file.version_id.clone(),
            is_latest: file.is_latest,
            size_bytes: written.size_bytes,
            content_type: file.content_type.clone(),
            etag: file.etag.clone().or(Some(written.etag)),
            created_at: file.created_at,
        })
    }

    async fn discard_staged(&self, dest: &Bucket, staged: &[FileRecord]) {
        for file in staged {
            if let Err(err) = self.blobs.delete(&dest.name, &file.physical_name()).await {
                warn!(bucket = %dest.name, file = %file.file_name, error = %err, "failed to discard staged copy");
            }
        }
    }
}

/// Percentage of `done` out of `total`, rounded to the nearest integer.
/// Only the last item reports 100.
pub fn progress_percent(done: usize, total: usize) -> i64 {
    if total == 0 || done >= total {
        return 100;
    }
    let pct = ((done as f64 / total as f64) * 100.0).round() as i64;
    pct.min(99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds_to_nearest() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(1, 8), 13);
    }

    #[test]
    fn progress_reaches_100_only_on_last_item() {
        let total = 1000;
        for done in 1..total {
            assert!(progress_percent(done, total) < 100, "{done}");
        }
        assert_eq!(progress_percent(999, total), 99);
        assert_eq!(progress_percent(total, total), 100);
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress_percent(0, 0), 100);
        assert_eq!(progress_percent(5, 4), 100);
        assert_eq!(progress_percent(0, 4), 0);
    }
}
