//! HTTP handlers for bucket lifecycle and listing.

use crate::{
    auth::Caller,
    errors::AppError,
    models::{
        bucket::{Acl, Bucket},
        file::FileRecord,
    },
    services::storage_service::{BucketInfo, NewBucket},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

/// Request body for `POST /api/buckets`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBucketReq {
    pub bucket_name: String,
    pub region: Option<String>,
    pub acl: Option<Acl>,
    pub versioning: Option<bool>,
    /// Maximum total payload size in bytes.
    pub quota: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    #[serde(default)]
    pub versions: bool,
}

#[derive(Serialize)]
pub struct BucketList {
    pub buckets: Vec<Bucket>,
}

#[derive(Serialize)]
pub struct FileList {
    pub bucket: String,
    pub files: Vec<FileRecord>,
}

/// `POST /api/buckets`
pub async fn create_bucket(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Json(req): Json<CreateBucketReq>,
) -> Result<(StatusCode, Json<Bucket>), AppError> {
    let bucket = state
        .storage
        .create_bucket(
            &caller,
            NewBucket {
                name: req.bucket_name,
                region: req.region,
                acl: req.acl,
                versioning: req.versioning,
                quota_bytes: req.quota,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

/// `GET /api/buckets`: the caller's own buckets.
pub async fn list_buckets(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<BucketList>, AppError> {
    let buckets = state.storage.list_buckets(&caller).await?;
    Ok(Json(BucketList { buckets }))
}

/// `GET /api/buckets/{bucket}`
pub async fn bucket_info(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(bucket): Path<String>,
) -> Result<Json<BucketInfo>, AppError> {
    Ok(Json(state.storage.bucket_info(&caller, &bucket).await?))
}

/// `DELETE /api/buckets/{bucket}`: only empty buckets.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_bucket(&caller, &bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/buckets/{bucket}/files[?versions=true]`
pub async fn list_files(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(bucket): Path<String>,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<FileList>, AppError> {
    let files = state.storage.list_files(&caller, &bucket, q.versions).await?;
    Ok(Json(FileList { bucket, files }))
}
