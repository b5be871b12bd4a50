pub mod account_service;
pub mod blob_store;
pub mod metadata_store;
pub mod storage_service;
pub mod task_dispatcher;
pub mod task_executor;
pub mod version_resolver;
