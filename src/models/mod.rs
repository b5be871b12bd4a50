//! Core data models for the object vault.
//!
//! These entities map to SQLite tables via `sqlx::FromRow` and serialize as
//! JSON via `serde`. Enumerated columns are stored as text.

pub mod bucket;
pub mod file;
pub mod job;
pub mod task;
pub mod user;
