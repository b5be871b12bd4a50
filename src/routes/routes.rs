use crate::{
    handlers::{
        auth_handlers::{me, rotate_keys},
        bucket_handlers::{bucket_info, create_bucket, delete_bucket, list_buckets, list_files},
        file_handlers::{delete_file, download_file, upload_file},
        health_handlers::{healthz, readyz},
        presigned_handlers::{issue_download_url, issue_upload_url, redeem_download, redeem_upload},
        task_handlers::{copy_bucket, empty_bucket, task_status},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{any, get, post},
};

/// Build the router for every HTTP endpoint.
///
/// Handlers share one `AppState`; authentication happens in the extractors
/// each handler asks for, so there is no auth middleware layer.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // account
        .route("/api/auth/rotate-keys", post(rotate_keys))
        .route("/api/auth/me", get(me))
        // buckets
        .route("/api/buckets", get(list_buckets).post(create_bucket))
        .route("/api/buckets/{bucket}", get(bucket_info).delete(delete_bucket))
        .route("/api/buckets/{bucket}/files", get(list_files))
        .route(
            "/api/buckets/{bucket}/files/{file}",
            post(upload_file).get(download_file).delete(delete_file),
        )
        // presigned URLs
        .route("/api/presigned/url/download", post(issue_download_url))
        .route("/api/presigned/url/upload", post(issue_upload_url))
        .route("/api/presigned/download", any(redeem_download))
        .route("/api/presigned/upload", any(redeem_upload))
        // bulk tasks
        .route("/api/tasks/empty-bucket/{bucket}", post(empty_bucket))
        .route("/api/tasks/copy-bucket/{src}/{dest}", post(copy_bucket))
        .route("/api/tasks/{task_id}", get(task_status))
}
