//! An account that owns buckets and signs requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A registered user.
///
/// The secret key never leaves the service after issuance or rotation, so it
/// is skipped during serialization.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: Uuid,

    /// Unique contact address.
    pub email: String,

    /// Public half of the signing credential, sent as `X-Access-Key`.
    pub access_key: String,

    /// HMAC key for both signing schemes.
    #[serde(skip_serializing)]
    pub secret_key: String,

    pub is_verified: bool,

    /// Free-form role label, `user` unless provisioned otherwise.
    pub role: String,

    pub created_at: DateTime<Utc>,
}
