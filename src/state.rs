//! Shared handles given to every request handler.

use crate::{
    auth::signature::SignatureEngine,
    middleware::rate_limit::RateLimiter,
    queue::JobQueue,
    services::{
        account_service::AccountService,
        blob_store::BlobStore,
        metadata_store::MetadataStore,
        storage_service::StorageService,
        task_dispatcher::{TaskDispatcher, TaskLimits},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub store: MetadataStore,
    pub blobs: BlobStore,
    pub accounts: AccountService,
    pub storage: StorageService,
    pub signatures: SignatureEngine,
    pub dispatcher: TaskDispatcher,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        store: MetadataStore,
        blobs: BlobStore,
        queue: JobQueue,
        limits: TaskLimits,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            accounts: AccountService::new(store.clone()),
            storage: StorageService::new(store.clone(), blobs.clone()),
            signatures: SignatureEngine::new(store.clone()),
            dispatcher: TaskDispatcher::new(store.clone(), queue, limits),
            rate_limiter,
            store,
            blobs,
        }
    }
}
