//! Business logic shared by the REST handlers and the GraphQL schema.

pub mod auth_service;
pub mod cache;
pub mod jobs;
pub mod mailer;
pub mod storage;
pub mod task_queue;
pub mod upload_service;
