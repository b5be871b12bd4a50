//! src/services/storage_service.rs
//!
//! StorageService: bucket and file operations on behalf of an authenticated
//! (or anonymous) caller. Metadata lives in SQLite through [`MetadataStore`],
//! payloads on disk through [`BlobStore`], and every operation is gated by
//! [`policy::authorize`] before anything about the target is revealed.

use crate::{
    auth::{
        AuthContext,
        policy::{self, Operation},
        signature::{self, MAX_PRESIGN_SECONDS, PresignOperation},
    },
    errors::{AppError, AppResult},
    models::{
        bucket::{Acl, Bucket},
        file::FileRecord,
    },
    services::{
        blob_store::BlobStore,
        metadata_store::{BucketUsage, MetadataStore},
        version_resolver::VersionResolver,
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use std::io::{self, ErrorKind};
use tokio::fs::File;
use tracing::{info, warn};
use uuid::Uuid;

/// Disk entries are capped at 255 bytes; versioned payloads carry a
/// 37-byte `{uuid}_` prefix, so logical names stop short of that.
const MAX_FILE_NAME_LEN: usize = 255 - 37;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

/// Parameters for a new bucket.
#[derive(Debug, Clone, Default)]
pub struct NewBucket {
    pub name: String,
    pub region: Option<String>,
    pub acl: Option<Acl>,
    pub versioning: Option<bool>,
    pub quota_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketInfo {
    #[serde(flatten)]
    pub bucket: Bucket,
    pub file_count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedUrl {
    pub url: String,
    pub expires: i64,
}

#[derive(Clone)]
pub struct StorageService {
    store: MetadataStore,
    blobs: BlobStore,
    versions: VersionResolver,
}

impl StorageService {
    pub fn new(store: MetadataStore, blobs: BlobStore) -> Self {
        Self {
            versions: VersionResolver::new(store.clone()),
            store,
            blobs,
        }
    }

    /// Look up a bucket by name, `NotFound` if it does not exist.
    async fn fetch_bucket(&self, name: &str) -> AppResult<Bucket> {
        ensure_bucket_name_safe(name)?;
        self.store
            .bucket_by_name(name)
            .await?
            .ok_or_else(|| AppError::not_found("bucket not found"))
    }

    /// Fetch a bucket and check `op` against it for `caller`.
    async fn authorized_bucket(
        &self,
        name: &str,
        op: Operation,
        caller: Option<&AuthContext>,
    ) -> AppResult<Bucket> {
        let bucket = self.fetch_bucket(name).await?;
        policy::authorize(&bucket, op, caller)?;
        Ok(bucket)
    }

    // --- buckets -----------------------------------------------------------

    /// Create a bucket owned by `caller` and its directory on disk.
    pub async fn create_bucket(&self, caller: &AuthContext, req: NewBucket) -> AppResult<Bucket> {
        ensure_bucket_name_safe(&req.name)?;
        let region = req
            .region
            .as_deref()
            .unwrap_or("local")
            .to_ascii_lowercase();
        ensure_region_valid(&region)?;
        if let Some(quota) = req.quota_bytes {
            if quota <= 0 {
                return Err(AppError::validation("quota must be a positive number of bytes"));
            }
        }

        self.blobs.ensure_bucket_dir(&req.name).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: req.name,
            owner_id: caller.user_id,
            acl: req.acl.unwrap_or_default(),
            versioning_enabled: req.versioning.unwrap_or(false),
            region,
            quota_bytes: req.quota_bytes,
            created_at: Utc::now(),
        };
        self.store.insert_bucket(&bucket).await?;

        info!(
            bucket = %bucket.name,
            user_id = %caller.user_id,
            acl = %bucket.acl,
            versioning = bucket.versioning_enabled,
            quota = ?bucket.quota_bytes,
            "bucket created"
        );
        Ok(bucket)
    }

    pub async fn list_buckets(&self, caller: &AuthContext) -> AppResult<Vec<Bucket>> {
        self.store.buckets_for_owner(caller.user_id).await
    }

    pub async fn bucket_info(&self, caller: &AuthContext, name: &str) -> AppResult<BucketInfo> {
        let bucket = self
            .authorized_bucket(name, Operation::ReadBucketInfo, Some(caller))
            .await?;
        let BucketUsage {
            file_count,
            total_bytes,
        } = self.store.bucket_usage(bucket.id).await?;
        Ok(BucketInfo {
            bucket,
            file_count,
            total_size: total_bytes,
        })
    }

    /// Delete an empty bucket. Buckets that still hold files are a `Conflict`;
    /// the empty-bucket task exists for those.
    pub async fn delete_bucket(&self, caller: &AuthContext, name: &str) -> AppResult<()> {
        let bucket = self
            .authorized_bucket(name, Operation::DeleteBucket, Some(caller))
            .await?;
        if self.store.bucket_usage(bucket.id).await?.file_count > 0 {
            warn!(bucket = %name, "bucket not empty, cannot delete");
            return Err(AppError::conflict("bucket is not empty"));
        }
        if !self.store.delete_bucket(bucket.id).await? {
            return Err(AppError::not_found("bucket not found"));
        }
        if let Err(err) = self.blobs.remove_bucket_dir(&bucket.name).await {
            warn!(bucket = %name, error = %err, "failed to remove bucket directory after delete");
        }
        info!(bucket = %name, "bucket deleted");
        Ok(())
    }

    // --- files -------------------------------------------------------------

    pub async fn list_files(
        &self,
        caller: &AuthContext,
        bucket: &str,
        all_versions: bool,
    ) -> AppResult<Vec<FileRecord>> {
        let bucket = self
            .authorized_bucket(bucket, Operation::ListFiles, Some(caller))
            .await?;
        self.store.list_files(bucket.id, !all_versions).await
    }

    /// Stream an upload to disk and record it.
    ///
    /// In a versioned bucket this creates a new latest version; otherwise an
    /// existing name is a `Conflict`. The payload is removed again if the row
    /// cannot be recorded or the bucket quota would be exceeded.
    pub async fn upload<S>(
        &self,
        caller: Option<&AuthContext>,
        bucket: &str,
        file_name: &str,
        content_type: Option<String>,
        stream: S,
    ) -> AppResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        ensure_file_name_safe(file_name)?;
        let bucket = self.authorized_bucket(bucket, Operation::Upload, caller).await?;
        let plan = self.versions.plan_write(&bucket, file_name).await?;

        let written = self
            .blobs
            .write_stream(&bucket.name, &plan.physical_name, stream)
            .await?;

        if let Some(quota) = bucket.quota_bytes {
            let used = self.store.bucket_usage(bucket.id).await?.total_bytes;
            if used + written.size_bytes > quota {
                self.discard_payload(&bucket.name, &plan.physical_name).await;
                return Err(AppError::validation("bucket quota exceeded"));
            }
        }

        let content_type = content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let record = match self
            .versions
            .record_write(&bucket, file_name, &content_type, &plan, &written)
            .await
        {
            Ok(record) => record,
            Err(err @ AppError::Conflict(_)) => {
                // Lost a race on a non-versioned name; the payload on disk is
                // the winner's as much as ours, so it stays.
                warn!(bucket = %bucket.name, file = %file_name, "concurrent upload of same name");
                return Err(err);
            }
            Err(err) => {
                self.discard_payload(&bucket.name, &plan.physical_name).await;
                return Err(err);
            }
        };

        info!(
            user_id = ?caller.map(|c| c.user_id),
            bucket = %bucket.name,
            file = %file_name,
            version = %record.version_id,
            size = record.size_bytes,
            "file uploaded"
        );
        Ok(record)
    }

    /// Resolve a file for download and open its payload.
    pub async fn open_for_download(
        &self,
        caller: Option<&AuthContext>,
        bucket: &str,
        file_name: &str,
        version_id: Option<&str>,
    ) -> AppResult<(FileRecord, File)> {
        let bucket = self.authorized_bucket(bucket, Operation::Download, caller).await?;
        let record = self.versions.resolve(&bucket, file_name, version_id).await?;

        let file = self
            .blobs
            .open(&bucket.name, &record.physical_name())
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    warn!(bucket = %bucket.name, file = %file_name, "file not found on disk");
                    AppError::not_found("file not found")
                } else {
                    err.into()
                }
            })?;

        info!(
            user_id = ?caller.map(|c| c.user_id),
            bucket = %bucket.name,
            file = %file_name,
            version = %record.version_id,
            "file download allowed"
        );
        Ok((record, file))
    }

    /// Delete one version (or the latest) of a file, promoting the next newest
    /// version when the latest one goes.
    pub async fn delete_file(
        &self,
        caller: &AuthContext,
        bucket: &str,
        file_name: &str,
        version_id: Option<&str>,
    ) -> AppResult<FileRecord> {
        let bucket = self
            .authorized_bucket(bucket, Operation::DeleteFile, Some(caller))
            .await?;
        let record = self.versions.resolve(&bucket, file_name, version_id).await?;

        self.blobs.delete(&bucket.name, &record.physical_name()).await?;
        if !self.store.delete_file(record.id).await? {
            return Err(AppError::not_found("file not found"));
        }
        self.versions.promote_after_delete(&bucket, &record).await?;

        info!(bucket = %bucket.name, file = %file_name, version = %record.version_id, "file deleted");
        Ok(record)
    }

    /// Issue a presigned URL for one operation on one key.
    #[allow(clippy::too_many_arguments)]
    pub async fn issue_presigned_url(
        &self,
        caller: &AuthContext,
        bucket: &str,
        key: &str,
        operation: PresignOperation,
        version_id: Option<&str>,
        duration_secs: i64,
        now: i64,
    ) -> AppResult<IssuedUrl> {
        if !(1..=MAX_PRESIGN_SECONDS).contains(&duration_secs) {
            return Err(AppError::validation("invalid duration"));
        }
        ensure_file_name_safe(key)?;
        let bucket = self
            .authorized_bucket(bucket, Operation::IssuePresignedUrl, Some(caller))
            .await?;
        let owner = self
            .store
            .user_by_id(bucket.owner_id)
            .await?
            .ok_or_else(|| AppError::internal("bucket owner missing"))?;

        let version_id = version_id.filter(|v| !v.is_empty());
        let expires = now + duration_secs;
        let sig = signature::sign_presigned(
            &owner.secret_key,
            &bucket.name,
            key,
            operation,
            expires,
            version_id,
        );
        let url = signature::presigned_url(&bucket.name, key, operation, expires, version_id, &sig);

        info!(
            user_id = %caller.user_id,
            bucket = %bucket.name,
            file = %key,
            operation = %operation,
            expires,
            "presigned URL generated"
        );
        Ok(IssuedUrl { url, expires })
    }

    async fn discard_payload(&self, bucket: &str, physical_name: &str) {
        if let Err(err) = self.blobs.delete(bucket, physical_name).await {
            warn!(bucket = %bucket, file = %physical_name, error = %err, "failed to discard payload");
        }
    }
}

/// Validate a logical file name.
///
/// Names address a single entry in the bucket directory, so separators,
/// traversal and control characters are rejected.
pub fn ensure_file_name_safe(name: &str) -> AppResult<()> {
    let invalid = || AppError::validation("invalid file name");
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return Err(invalid());
    }
    if name == "." || name == ".." || name.starts_with(".tmp-") {
        return Err(invalid());
    }
    if name
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\' || b == b'\0')
    {
        return Err(invalid());
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn ensure_bucket_name_safe(name: &str) -> AppResult<()> {
    let invalid = |reason: &str| AppError::validation(format!("bucket `{name}` invalid: {reason}"));

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid("cannot contain consecutive dots or dot-hyphen combinations"));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Case-insensitive check against SUPPORTED_REGIONS.
fn ensure_region_valid(region: &str) -> AppResult<()> {
    if SUPPORTED_REGIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(region))
    {
        Ok(())
    } else {
        Err(AppError::validation(format!("region `{region}` is not supported")))
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
