//! Represents a logical bucket, a top-level container for files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Access-control label of a bucket.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum Acl {
    /// Only the owner may do anything.
    #[default]
    Private,
    /// Anyone may download; everything else is owner-only.
    PublicRead,
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acl::Private => f.write_str("private"),
            Acl::PublicRead => f.write_str("public-read"),
        }
    }
}

/// A storage bucket.
///
/// Buckets act as namespaces for files and belong to exactly one user. The
/// versioning flag decides how uploads of an existing name are handled and is
/// inherited when a bucket is created as a copy destination.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket.
    pub id: Uuid,

    /// Globally unique bucket name (DNS-style naming rules).
    pub name: String,

    /// ID of the user that owns this bucket.
    pub owner_id: Uuid,

    pub acl: Acl,

    /// Whether uploads of an existing name create a new version.
    pub versioning_enabled: bool,

    /// Region tag (e.g. "us-west-2"). Informational only.
    pub region: String,

    /// Upper bound on the summed size of all files, in bytes.
    pub quota_bytes: Option<i64>,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}
