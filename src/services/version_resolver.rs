//! VersionResolver: maps `(bucket, name, version?)` to a concrete file row and
//! keeps the `is_latest` invariants when rows are added or removed.
//!
//! Invariants maintained here:
//! - at most one row per `(bucket, name)` carries `is_latest`;
//! - a non-versioned bucket holds at most one row per name;
//! - after deleting the latest version, the remaining row with the greatest
//!   `created_at` becomes latest.

use crate::{
    errors::{AppError, AppResult},
    models::{
        bucket::Bucket,
        file::{FileRecord, physical_name},
    },
    services::{blob_store::WrittenBlob, metadata_store::MetadataStore},
};
use chrono::Utc;
use uuid::Uuid;

/// Where and how a new upload is going to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    pub version_id: String,
    pub physical_name: String,
    /// Existing versions of the name must lose `is_latest` when the row lands.
    pub demote_others: bool,
}

#[derive(Clone)]
pub struct VersionResolver {
    store: MetadataStore,
}

impl VersionResolver {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// Row for reads and deletes: the exact version when one is given,
    /// otherwise the latest.
    pub async fn resolve(
        &self,
        bucket: &Bucket,
        file_name: &str,
        version_id: Option<&str>,
    ) -> AppResult<FileRecord> {
        let found = match version_id.filter(|v| !v.is_empty()) {
            Some(version) => self.store.file_version(bucket.id, file_name, version).await?,
            None => self.store.latest_file(bucket.id, file_name).await?,
        };
        found.ok_or_else(|| AppError::not_found("file not found"))
    }

    /// Decide version and physical name for an upload of `file_name`.
    ///
    /// Fails with `Conflict` when the bucket is not versioned and the name is
    /// already taken.
    pub async fn plan_write(&self, bucket: &Bucket, file_name: &str) -> AppResult<WritePlan> {
        if bucket.versioning_enabled {
            let version_id = Uuid::new_v4().to_string();
            return Ok(WritePlan {
                physical_name: physical_name(file_name, &version_id),
                version_id,
                demote_others: true,
            });
        }

        if self.store.has_file_named(bucket.id, file_name).await? {
            tracing::warn!(bucket = %bucket.name, file = %file_name, "file exists and versioning disabled");
            return Err(AppError::conflict("file already exists"));
        }
        Ok(WritePlan {
            version_id: String::new(),
            physical_name: physical_name(file_name, ""),
            demote_others: false,
        })
    }

    /// Insert the row for a payload written according to `plan`.
    ///
    /// The demotion of older versions and the insert share one transaction.
    /// The unique index on `(bucket, name, version)` turns a lost race on a
    /// non-versioned name into `Conflict`.
    pub async fn record_write(
        &self,
        bucket: &Bucket,
        file_name: &str,
        content_type: &str,
        plan: &WritePlan,
        written: &WrittenBlob,
    ) -> AppResult<FileRecord> {
        let record = FileRecord {
            id: Uuid::new_v4(),
            bucket_id: bucket.id,
            file_name: file_name.to_string(),
            version_id: plan.version_id.clone(),
            is_latest: true,
            size_bytes: written.size_bytes,
            content_type: content_type.to_string(),
            etag: Some(written.etag.clone()),
            created_at: Utc::now(),
        };
        self.store.insert_file(&record, plan.demote_others).await?;
        Ok(record)
    }

    /// Restore the latest pointer after `deleted` was removed.
    ///
    /// Returns the promoted row, if any.
    pub async fn promote_after_delete(
        &self,
        bucket: &Bucket,
        deleted: &FileRecord,
    ) -> AppResult<Option<FileRecord>> {
        if !bucket.versioning_enabled || !deleted.is_latest {
            return Ok(None);
        }

        let remaining = self.store.file_versions(bucket.id, &deleted.file_name).await?;
        let Some(mut newest) = remaining.into_iter().max_by_key(|f| f.created_at) else {
            return Ok(None);
        };

        self.store.mark_latest(newest.id).await?;
        newest.is_latest = true;
        tracing::debug!(
            bucket = %bucket.name,
            file = %newest.file_name,
            version = %newest.version_id,
            "promoted version to latest"
        );
        Ok(Some(newest))
    }
}
