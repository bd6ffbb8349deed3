//! In-process task queue with a persisted status table.
//!
//! `enqueue` stores a `PENDING` row and hands the job to a pool of workers
//! over an unbounded channel. Workers move the row through `STARTED` to
//! `SUCCESS` or `FAILURE`. Clients poll `status`; ids the queue has never
//! seen report `PENDING`.

use crate::{
    models::task::{TaskRecord, TaskState, TaskStatus},
    services::storage::Backend,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Work the queue knows how to run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum Job {
    SendEmail {
        recipient: String,
        subject: String,
        body: String,
    },
    ProcessFile {
        backend: Backend,
        file_id: String,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::SendEmail { .. } => "send_email",
            Job::ProcessFile { .. } => "process_file",
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task queue is closed")]
    Closed,
    #[error("corrupt task record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Executes a job and returns its JSON result, or an error message that is
/// stored on the task.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, task_id: &str, job: Job) -> Result<Value, String>;
}

struct QueuedTask {
    id: String,
    job: Job,
}

#[derive(Clone)]
pub struct TaskQueue {
    db: Arc<SqlitePool>,
    sender: mpsc::UnboundedSender<QueuedTask>,
}

impl TaskQueue {
    /// Spawn `workers` workers and return the queue feeding them.
    pub fn start(
        db: Arc<SqlitePool>,
        workers: usize,
        handler: Arc<dyn JobHandler>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    db.clone(),
                    receiver.clone(),
                    handler.clone(),
                ))
            })
            .collect();

        info!("Started {} task workers", workers.max(1));
        (Self { db, sender }, handles)
    }

    /// Persist a job as `PENDING` and schedule it. Returns the task id.
    pub async fn enqueue(&self, job: Job) -> Result<String, TaskError> {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&job)?;

        sqlx::query(
            "INSERT INTO tasks (id, name, payload, status, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(job.name())
        .bind(&payload)
        .bind(TaskState::Pending.as_str())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!(task_id = %id, name = job.name(), "enqueued task");
        self.sender
            .send(QueuedTask {
                id: id.clone(),
                job,
            })
            .map_err(|_| TaskError::Closed)?;
        Ok(id)
    }

    /// Current status of a task.
    pub async fn status(&self, task_id: &str) -> Result<TaskStatus, TaskError> {
        let record = sqlx::query_as::<_, TaskRecord>(
            "SELECT id, name, payload, status, result, error, created_at, started_at, finished_at
             FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&*self.db)
        .await?;

        match record {
            Some(record) => TaskStatus::try_from(record).map_err(TaskError::Corrupt),
            None => Ok(TaskStatus::pending(task_id)),
        }
    }

    /// Settle tasks left behind by a previous process: interrupted ones are
    /// failed, pending ones are scheduled again. Returns how many were
    /// rescheduled.
    pub async fn recover(&self) -> Result<usize, TaskError> {
        let interrupted = sqlx::query(
            "UPDATE tasks SET status = ?, error = ?, finished_at = ? WHERE status = ?",
        )
        .bind(TaskState::Failure.as_str())
        .bind("interrupted by restart")
        .bind(Utc::now())
        .bind(TaskState::Started.as_str())
        .execute(&*self.db)
        .await?
        .rows_affected();

        let pending: Vec<(String, String)> =
            sqlx::query_as("SELECT id, payload FROM tasks WHERE status = ? ORDER BY created_at")
                .bind(TaskState::Pending.as_str())
                .fetch_all(&*self.db)
                .await?;

        let mut rescheduled = 0;
        for (id, payload) in pending {
            let job: Job = serde_json::from_str(&payload)?;
            self.sender
                .send(QueuedTask { id, job })
                .map_err(|_| TaskError::Closed)?;
            rescheduled += 1;
        }

        if interrupted > 0 || rescheduled > 0 {
            info!(interrupted, rescheduled, "recovered tasks from previous run");
        }
        Ok(rescheduled)
    }
}

async fn worker_loop(
    worker: usize,
    db: Arc<SqlitePool>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
    handler: Arc<dyn JobHandler>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            debug!(worker, "task channel closed, worker exiting");
            break;
        };
        if let Err(err) = execute(&db, handler.as_ref(), task).await {
            warn!(worker, "failed to record task outcome: {}", err);
        }
    }
}

async fn execute(
    db: &SqlitePool,
    handler: &dyn JobHandler,
    task: QueuedTask,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE tasks SET status = ?, started_at = ? WHERE id = ?")
        .bind(TaskState::Started.as_str())
        .bind(Utc::now())
        .bind(&task.id)
        .execute(db)
        .await?;

    let name = task.job.name();
    match handler.run(&task.id, task.job).await {
        Ok(result) => {
            sqlx::query("UPDATE tasks SET status = ?, result = ?, finished_at = ? WHERE id = ?")
                .bind(TaskState::Success.as_str())
                .bind(result.to_string())
                .bind(Utc::now())
                .bind(&task.id)
                .execute(db)
                .await?;
            info!(task_id = %task.id, name, "task succeeded");
        }
        Err(error) => {
            sqlx::query("UPDATE tasks SET status = ?, error = ?, finished_at = ? WHERE id = ?")
                .bind(TaskState::Failure.as_str())
                .bind(&error)
                .bind(Utc::now())
                .bind(&task.id)
                .execute(db)
                .await?;
            warn!(task_id = %task.id, name, "task failed: {}", error);
        }
    }
    Ok(())
}
