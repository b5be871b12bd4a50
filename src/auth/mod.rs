//! Request authentication.
//!
//! The signing headers are checked once per request by the extractors below,
//! which hand handlers a typed [`AuthContext`]. Presigned URLs are verified by
//! the presigned handlers through [`signature::SignatureEngine`] and produce
//! the same context for the bucket owner.

use crate::{errors::AppError, models::user::User, state::AppState};
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use uuid::Uuid;

pub mod policy;
pub mod signature;

/// How the caller proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Header,
    Presigned,
}

/// Authenticated identity of the caller.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub access_key: String,
    pub via: AuthMethod,
}

impl AuthContext {
    pub fn for_user(user: &User, via: AuthMethod) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            access_key: user.access_key.clone(),
            via,
        }
    }
}

/// Caller identity if signing headers were sent, `None` for anonymous calls.
///
/// Headers that are present but wrong reject the request.
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<AuthContext>);

/// Caller identity on routes that never serve anonymous requests.
#[derive(Debug, Clone)]
pub struct Caller(pub AuthContext);

impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(creds) = signature::header_credentials(&parts.headers)? else {
            return Ok(MaybeCaller(None));
        };
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path());
        let ctx = state
            .signatures
            .authenticate_request(&creds, parts.method.as_str(), path, Utc::now().timestamp())
            .await?;
        Ok(MaybeCaller(Some(ctx)))
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match MaybeCaller::from_request_parts(parts, state).await? {
            MaybeCaller(Some(ctx)) => Ok(Caller(ctx)),
            MaybeCaller(None) => Err(AppError::authentication("missing authentication headers")),
        }
    }
}
