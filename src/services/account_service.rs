//! User provisioning and key rotation.

use crate::{
    auth::{AuthContext, signature::generate_credentials},
    errors::{AppError, AppResult},
    models::user::User,
    services::metadata_store::MetadataStore,
};
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

const MAX_EMAIL_LEN: usize = 254;

/// A freshly issued key pair. This is the only place a secret key is ever
/// serialized.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone)]
pub struct AccountService {
    store: MetadataStore,
}

impl AccountService {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    pub async fn create_user(&self, email: &str) -> AppResult<IssuedCredentials> {
        let email = email.trim().to_ascii_lowercase();
        ensure_email_valid(&email)?;

        let (access_key, secret_key) = generate_credentials();
        let user = User {
            id: Uuid::new_v4(),
            email,
            access_key,
            secret_key,
            is_verified: true,
            role: "user".into(),
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;

        info!(user_id = %user.id, email = %user.email, "user created");
        Ok(IssuedCredentials {
            user_id: user.id,
            email: user.email,
            access_key: user.access_key,
            secret_key: user.secret_key,
        })
    }

    /// Replace the caller's key pair. Signatures made with the old secret stop
    /// verifying immediately, presigned URLs included.
    pub async fn rotate_keys(&self, caller: &AuthContext) -> AppResult<IssuedCredentials> {
        let (access_key, secret_key) = generate_credentials();
        self.store
            .update_user_keys(caller.user_id, &access_key, &secret_key)
            .await?;

        info!(user_id = %caller.user_id, "keys rotated");
        Ok(IssuedCredentials {
            user_id: caller.user_id,
            email: caller.email.clone(),
            access_key,
            secret_key,
        })
    }

    pub async fn profile(&self, caller: &AuthContext) -> AppResult<User> {
        self.store
            .user_by_id(caller.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))
    }
}

fn ensure_email_valid(email: &str) -> AppResult<()> {
    let invalid = || AppError::validation("invalid email address");
    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(invalid()),
    }
}
