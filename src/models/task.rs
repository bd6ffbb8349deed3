//! Background task records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};

/// Lifecycle of a queued task, named the way task-queue clients expect.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
        }
    }

    /// True once the task has finished, successfully or not.
    pub fn is_ready(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "STARTED" => Ok(TaskState::Started),
            "SUCCESS" => Ok(TaskState::Success),
            "FAILURE" => Ok(TaskState::Failure),
            other => Err(format!("unknown task state `{}`", other)),
        }
    }
}

/// Persisted row of the `tasks` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub payload: String,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What a status poll reports back to the client.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TaskStatus {
    pub task_id: String,
    pub state: TaskState,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskStatus {
    /// Status reported for ids the queue has never seen.
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Pending,
            result: None,
            error: None,
        }
    }

    pub fn ready(&self) -> bool {
        self.state.is_ready()
    }
}

impl TryFrom<TaskRecord> for TaskStatus {
    type Error = String;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let state = record.status.parse::<TaskState>()?;
        let result = record
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| format!("corrupt task result: {}", err))?;
        Ok(Self {
            task_id: record.id,
            state,
            result,
            error: record.error,
        })
    }
}
