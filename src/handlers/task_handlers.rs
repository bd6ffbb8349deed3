//! Task status polling.

use crate::{errors::AppError, handlers::extract::ApiQuery, state::AppState};
use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub task_id: Option<String>,
}

/// `GET celery_status/?task_id=`: `{"Status": <state>, "Result": <ready>}`.
pub async fn task_status(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TaskQuery>,
) -> Result<Json<Value>, AppError> {
    let task_id = query
        .task_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Task_id required"))?;

    let status = state.tasks.status(task_id.trim()).await?;
    Ok(Json(json!({
        "Status": status.state,
        "Result": status.ready(),
    })))
}
