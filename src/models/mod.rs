//! Core data models.
//!
//! Rows map to SQLite tables via `sqlx::FromRow` and serialize as JSON via
//! `serde`.

pub mod task;
pub mod upload_file;
pub mod user;
