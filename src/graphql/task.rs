//! Task status query.

use super::app_state;
use async_graphql::{Context, Object, Result as GraphQLResult, SimpleObject};

#[derive(SimpleObject, Clone, Debug)]
#[graphql(name = "CeleryType", rename_fields = "snake_case")]
pub struct TaskType {
    /// `PENDING`, `STARTED`, `SUCCESS` or `FAILURE`.
    pub task_status: String,
    /// Whether the task has finished.
    pub task_result: bool,
}

#[derive(Default)]
pub struct TaskQuery;

#[Object(rename_fields = "snake_case", rename_args = "snake_case")]
impl TaskQuery {
    async fn celery(&self, ctx: &Context<'_>, task_id: String) -> GraphQLResult<TaskType> {
        let state = app_state(ctx)?;
        let status = state.tasks.status(&task_id).await?;
        Ok(TaskType {
            task_status: status.state.to_string(),
            task_result: status.ready(),
        })
    }
}
