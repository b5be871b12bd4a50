//! HTTP handlers for files inside a bucket.
//! Bodies are streamed in both directions; nothing is buffered whole.

use crate::{
    auth::{Caller, MaybeCaller},
    errors::AppError,
    models::file::FileRecord,
    services::storage_service::DEFAULT_CONTENT_TYPE,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::io;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

pub(crate) const VERSION_ID_HEADER: &str = "x-version-id";

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    #[serde(rename = "versionID")]
    pub version_id: Option<String>,
}

/// `POST /api/buckets/{bucket}/files/{file}`: raw request body is the payload.
pub async fn upload_file(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path((bucket, file)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let record = state
        .storage
        .upload(
            caller.as_ref(),
            &bucket,
            &file,
            request_content_type(&headers),
            body_stream(body),
        )
        .await?;
    Ok(uploaded_response(record))
}

/// `GET /api/buckets/{bucket}/files/{file}`: latest version unless
/// `?versionID=` picks one.
pub async fn download_file(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Path((bucket, file)): Path<(String, String)>,
    Query(q): Query<VersionQuery>,
) -> Result<Response, AppError> {
    let (record, handle) = state
        .storage
        .open_for_download(caller.as_ref(), &bucket, &file, q.version_id.as_deref())
        .await?;
    Ok(file_response(&record, handle))
}

/// `DELETE /api/buckets/{bucket}/files/{file}`
pub async fn delete_file(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((bucket, file)): Path<(String, String)>,
    Query(q): Query<VersionQuery>,
) -> Result<Json<FileRecord>, AppError> {
    let record = state
        .storage
        .delete_file(&caller, &bucket, &file, q.version_id.as_deref())
        .await?;
    Ok(Json(record))
}

pub(crate) fn request_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

pub(crate) fn body_stream(body: Body) -> impl Stream<Item = io::Result<Bytes>> {
    body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other))
}

/// `201 Created` with the new row as JSON and its etag/version as headers.
pub(crate) fn uploaded_response(record: FileRecord) -> Response {
    let mut headers = HeaderMap::new();
    set_identity_headers(&mut headers, &record);
    (StatusCode::CREATED, headers, Json(record)).into_response()
}

/// Stream a payload back with its metadata as headers.
pub(crate) fn file_response(record: &FileRecord, file: File) -> Response {
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size_bytes.max(0)));
    if let Ok(value) = HeaderValue::from_str(
        &record
            .created_at
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string(),
    ) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    set_identity_headers(headers, record);
    response
}

fn set_identity_headers(headers: &mut HeaderMap, record: &FileRecord) {
    if let Some(etag) = record.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\"")) {
            headers.insert(header::ETAG, value);
        }
    }
    if !record.version_id.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&record.version_id) {
            headers.insert(HeaderName::from_static(VERSION_ID_HEADER), value);
        }
    }
}
