//! Represents one stored instance (version) of a file in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a single stored payload.
///
/// A logical `file_name` may have several rows in a versioned bucket; exactly
/// one of them carries `is_latest`. Non-versioned buckets hold at most one
/// row per name and leave `version_id` empty.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Logical name the client addresses the file by.
    pub file_name: String,

    /// Version identifier, empty when the bucket is not versioned.
    pub version_id: String,

    /// Marks the currently-active version of `file_name`.
    pub is_latest: bool,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type).
    pub content_type: String,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Name of the payload on disk inside the bucket directory.
    pub fn physical_name(&self) -> String {
        physical_name(&self.file_name, &self.version_id)
    }
}

/// `{version}_{name}` for versioned payloads, the bare name otherwise.
pub fn physical_name(file_name: &str, version_id: &str) -> String {
    if version_id.is_empty() {
        file_name.to_string()
    } else {
        format!("{version_id}_{file_name}")
    }
}
