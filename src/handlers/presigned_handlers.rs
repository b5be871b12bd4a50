//! Issuing and redeeming presigned URLs.
//!
//! Redemption endpoints accept any verb so that a verb which does not match
//! the endpoint is rejected by the signature engine rather than the router.

use super::file_handlers::{body_stream, file_response, request_content_type, uploaded_response};
use crate::{
    auth::{
        AuthContext, Caller,
        signature::{PresignOperation, PresignedQuery},
    },
    errors::AppError,
    services::storage_service::IssuedUrl,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Method},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;

const DEFAULT_DURATION_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
pub struct IssueQuery {
    pub bucket: Option<String>,
    pub key: Option<String>,
    #[serde(rename = "versionID")]
    pub version_id: Option<String>,
    /// Lifetime in seconds; kept as text so a bad value is a JSON error.
    pub duration: Option<String>,
}

/// `POST /api/presigned/url/download`
pub async fn issue_download_url(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(q): Query<IssueQuery>,
) -> Result<Json<IssuedUrl>, AppError> {
    issue(&state, &caller, q, PresignOperation::Download).await
}

/// `POST /api/presigned/url/upload`
pub async fn issue_upload_url(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(q): Query<IssueQuery>,
) -> Result<Json<IssuedUrl>, AppError> {
    issue(&state, &caller, q, PresignOperation::Upload).await
}

async fn issue(
    state: &AppState,
    caller: &AuthContext,
    q: IssueQuery,
    operation: PresignOperation,
) -> Result<Json<IssuedUrl>, AppError> {
    let (Some(bucket), Some(key)) = (
        q.bucket.as_deref().filter(|v| !v.is_empty()),
        q.key.as_deref().filter(|v| !v.is_empty()),
    ) else {
        return Err(AppError::validation("bucket and key are required"));
    };
    let duration = parse_duration(q.duration.as_deref())?;
    let version_id = match operation {
        PresignOperation::Download => q.version_id.as_deref(),
        PresignOperation::Upload => None,
    };

    let issued = state
        .storage
        .issue_presigned_url(
            caller,
            bucket,
            key,
            operation,
            version_id,
            duration,
            Utc::now().timestamp(),
        )
        .await?;
    Ok(Json(issued))
}

/// `/api/presigned/download`: streams the granted file.
pub async fn redeem_download(
    State(state): State<AppState>,
    method: Method,
    Query(q): Query<PresignedQuery>,
) -> Result<Response, AppError> {
    let grant = state
        .signatures
        .redeem_presigned(&q, &method, PresignOperation::Download, Utc::now().timestamp())
        .await?;
    let (record, file) = state
        .storage
        .open_for_download(
            Some(&grant.caller),
            &grant.bucket,
            &grant.key,
            grant.version_id.as_deref(),
        )
        .await?;
    Ok(file_response(&record, file))
}

/// `/api/presigned/upload`: raw request body is the payload.
pub async fn redeem_upload(
    State(state): State<AppState>,
    method: Method,
    Query(q): Query<PresignedQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let grant = state
        .signatures
        .redeem_presigned(&q, &method, PresignOperation::Upload, Utc::now().timestamp())
        .await?;
    let record = state
        .storage
        .upload(
            Some(&grant.caller),
            &grant.bucket,
            &grant.key,
            request_content_type(&headers),
            body_stream(body),
        )
        .await?;
    Ok(uploaded_response(record))
}

fn parse_duration(raw: Option<&str>) -> Result<i64, AppError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(DEFAULT_DURATION_SECS),
        Some(value) => value
            .parse::<i64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| AppError::validation("invalid duration")),
    }
}
