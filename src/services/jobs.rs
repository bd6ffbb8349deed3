//! Job implementations run by the task queue workers.

use crate::services::{
    mailer::Mailer,
    storage::{Backend, DiskStore, FileStore, MongoStore},
    task_queue::{Job, JobHandler},
};
use async_trait::async_trait;
use futures::StreamExt;
use md5::Context;
use serde_json::{Value, json};
use std::sync::Arc;

/// Dispatches queued jobs to the mailer and the file stores.
pub struct JobRunner {
    mailer: Mailer,
    disk: Arc<DiskStore>,
    mongo: Option<Arc<MongoStore>>,
}

impl JobRunner {
    pub fn new(mailer: Mailer, disk: Arc<DiskStore>, mongo: Option<Arc<MongoStore>>) -> Self {
        Self { mailer, disk, mongo }
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn run(&self, task_id: &str, job: Job) -> Result<Value, String> {
        match job {
            Job::SendEmail {
                recipient,
                subject,
                body,
            } => {
                let outbox_id = self
                    .mailer
                    .send(Some(task_id), &recipient, &subject, &body)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "outbox_id": outbox_id, "recipient": recipient }))
            }
            Job::ProcessFile { backend, file_id } => match backend {
                Backend::Db => process_file(self.disk.as_ref(), &file_id).await,
                Backend::Mongo => match &self.mongo {
                    Some(store) => process_file(store.as_ref(), &file_id).await,
                    None => Err("mongo storage is not configured".to_string()),
                },
            },
        }
    }
}

/// Stream a stored file once, computing its size, MD5 and line count.
pub async fn process_file<S: FileStore>(store: &S, raw_id: &str) -> Result<Value, String> {
    let id = store.parse_id(raw_id).map_err(|err| err.to_string())?;
    let meta = store.find(&id).await.map_err(|err| err.to_string())?;
    let mut body = store.open(&id).await.map_err(|err| err.to_string())?;

    let mut digest = Context::new();
    let mut size_bytes: u64 = 0;
    let mut lines: u64 = 0;
    let mut last_byte = None;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| err.to_string())?;
        size_bytes += chunk.len() as u64;
        lines += chunk.iter().filter(|b| **b == b'\n').count() as u64;
        last_byte = chunk.last().copied().or(last_byte);
        digest.consume(&chunk);
    }
    if matches!(last_byte, Some(b) if b != b'\n') {
        lines += 1;
    }

    Ok(json!({
        "backend": S::BACKEND,
        "file_id": id,
        "file_name": meta.file_name,
        "size_bytes": size_bytes,
        "lines": lines,
        "md5": format!("{:x}", digest.compute()),
    }))
}
