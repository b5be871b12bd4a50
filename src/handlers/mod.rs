pub mod auth_handlers;
pub mod bucket_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod presigned_handlers;
pub mod task_handlers;
