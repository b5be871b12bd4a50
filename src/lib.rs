//! Object storage service: signed HTTP access to buckets and files, plus
//! asynchronous bulk bucket tasks drained by a worker pool.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use middleware::rate_limit::{RateLimitConfig, RateLimiter, limit_by_ip};
use queue::{JobQueue, worker_pool::WorkerPool};
use services::{
    blob_store::BlobStore, metadata_store::MetadataStore, task_dispatcher::TaskLimits,
    task_executor::TaskExecutor,
};
use sqlx::SqlitePool;
use state::AppState;
use std::{path::PathBuf, time::Duration};

/// Construct every component once around one pool and one storage root.
pub fn build(
    db: SqlitePool,
    storage_dir: impl Into<PathBuf>,
    limits: TaskLimits,
    poll_interval: Duration,
    rate_limit: RateLimitConfig,
) -> (AppState, WorkerPool) {
    let store = MetadataStore::new(db.clone());
    let blobs = BlobStore::new(storage_dir);
    let queue = JobQueue::new(db);

    let workers = WorkerPool::new(
        queue.clone(),
        TaskExecutor::new(store.clone(), blobs.clone()),
        poll_interval,
    );
    let state = AppState::new(store, blobs, queue, limits, RateLimiter::new(rate_limit));
    (state, workers)
}

/// The HTTP application with state attached. Every route sits behind the
/// per-IP rate limiter.
pub fn app(state: AppState) -> Router {
    let limiter = state.rate_limiter.clone();
    routes::routes::routes()
        .layer(axum::middleware::from_fn_with_state(limiter, limit_by_ip))
        .with_state(state)
}
