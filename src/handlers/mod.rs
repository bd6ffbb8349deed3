//! HTTP handlers.

pub mod auth;
pub mod extract;
pub mod file_handlers;
pub mod health_handlers;
pub mod task_handlers;
pub mod user_handlers;
