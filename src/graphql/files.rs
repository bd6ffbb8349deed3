//! File mutations for both backends: `file_db_*` (disk, integer ids) and
//! `file_mongo_*` (GridFS, hex ids).

use super::{MutationPayload, app_state, authenticate};
use crate::{
    errors::AppError,
    handlers::file_handlers::{new_upload, owned_file, queue_processing, store_upload},
    services::storage::{DiskStore, MongoStore},
    state::SelectStore,
};
use async_graphql::{Context, Object, Result as GraphQLResult, Upload, UploadValue};
use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::json;
use std::io::Read;
use tracing::info;

#[derive(Default)]
pub struct FileMutation;

#[Object(rename_fields = "snake_case", rename_args = "snake_case")]
impl FileMutation {
    async fn file_db_upload(
        &self,
        ctx: &Context<'_>,
        file: Upload,
        token: String,
        sync: Option<bool>,
    ) -> GraphQLResult<MutationPayload> {
        upload::<DiskStore>(ctx, file, &token, sync.unwrap_or_default()).await
    }

    async fn file_db_delete(
        &self,
        ctx: &Context<'_>,
        file_id: i64,
        token: String,
    ) -> GraphQLResult<MutationPayload> {
        delete::<DiskStore>(ctx, &file_id.to_string(), &token).await
    }

    /// Queue processing of a disk-backed file.
    async fn file_db_change(
        &self,
        ctx: &Context<'_>,
        file_id: i64,
        token: String,
    ) -> GraphQLResult<MutationPayload> {
        change::<DiskStore>(ctx, &file_id.to_string(), &token).await
    }

    async fn file_mongo_upload(
        &self,
        ctx: &Context<'_>,
        file: Upload,
        token: String,
        sync: Option<bool>,
    ) -> GraphQLResult<MutationPayload> {
        upload::<MongoStore>(ctx, file, &token, sync.unwrap_or_default()).await
    }

    async fn file_mongo_delete(
        &self,
        ctx: &Context<'_>,
        file_id: String,
        token: String,
    ) -> GraphQLResult<MutationPayload> {
        delete::<MongoStore>(ctx, &file_id, &token).await
    }

    async fn file_mongo_change(
        &self,
        ctx: &Context<'_>,
        file_id: String,
        token: String,
    ) -> GraphQLResult<MutationPayload> {
        change::<MongoStore>(ctx, &file_id, &token).await
    }
}

async fn upload<S: SelectStore>(
    ctx: &Context<'_>,
    file: Upload,
    token: &str,
    sync: bool,
) -> GraphQLResult<MutationPayload> {
    let state = app_state(ctx)?;
    let value = file.value(ctx)?;

    let result = async {
        let user = authenticate(state, token).await?;
        let store = S::select(state)?;
        let (file_name, content_type, data) = read_upload(value).await?;
        let id = store_upload(
            state,
            store,
            new_upload(&user, file_name, content_type, data),
            sync,
        )
        .await?;
        Ok::<_, AppError>(MutationPayload::ok(
            StatusCode::CREATED,
            Some(json!({ "file_id": id })),
        ))
    };
    Ok(result.await.unwrap_or_else(MutationPayload::failure))
}

async fn delete<S: SelectStore>(
    ctx: &Context<'_>,
    file_id: &str,
    token: &str,
) -> GraphQLResult<MutationPayload> {
    let state = app_state(ctx)?;
    let result = async {
        let user = authenticate(state, token).await?;
        let store = S::select(state)?;
        let (id, _) = owned_file(store.as_ref(), Some(file_id), &user).await?;
        store.delete(&id).await?;
        info!(backend = %S::BACKEND, file_id = %id, user_id = user.id, "file deleted");
        Ok::<_, AppError>(MutationPayload::ok(
            StatusCode::OK,
            Some(json!(format!("your file with {} was deleted", id))),
        ))
    };
    Ok(result.await.unwrap_or_else(MutationPayload::failure))
}

async fn change<S: SelectStore>(
    ctx: &Context<'_>,
    file_id: &str,
    token: &str,
) -> GraphQLResult<MutationPayload> {
    let state = app_state(ctx)?;
    let result = async {
        let user = authenticate(state, token).await?;
        let store = S::select(state)?;
        let (id, _) = owned_file(store.as_ref(), Some(file_id), &user).await?;
        let task_id = queue_processing::<S>(state, &id).await?;
        Ok::<_, AppError>(MutationPayload::ok(
            StatusCode::ACCEPTED,
            Some(json!({ "task_id": task_id })),
        ))
    };
    Ok(result.await.unwrap_or_else(MutationPayload::failure))
}

/// Drain the multipart temp file off the async runtime.
async fn read_upload(value: UploadValue) -> Result<(String, Option<String>, Bytes), AppError> {
    let file_name = value.filename.clone();
    let content_type = value.content_type.clone();
    let mut reader = value.into_read();

    let data = tokio::task::spawn_blocking(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map(|_| buf)
    })
    .await
    .map_err(|err| AppError::internal(err.to_string()))?
    .map_err(|err| AppError::internal(format!("reading upload: {}", err)))?;

    Ok((file_name, content_type, Bytes::from(data)))
}
