//! File endpoints, shared by both backends: `file/` (disk) and
//! `file/mongo/` (GridFS). Handlers are generic over the store and the
//! routes pick the concrete one.

use crate::{
    errors::AppError,
    handlers::{
        auth::AuthUser,
        extract::{ApiQuery, FileRef},
    },
    models::{upload_file::StoredFile, user::User},
    services::{
        storage::{FileStore, NewUpload},
        task_queue::Job,
        upload_service::{self, UPLOAD_TIMED_OUT, UploadOutcome},
    },
    state::{AppState, SelectStore},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub sync_mode: Option<String>,
}

/// `POST file/`: multipart upload with a `file` part and an optional
/// `sync_mode` flag (form field or query parameter).
pub async fn upload_file<S: SelectStore>(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<UploadQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let store = S::select(&state)?;
    let mut multipart = multipart?;

    let mut sync_mode = query.sync_mode.as_deref().is_some_and(parse_flag);
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                file = Some((file_name, content_type, data));
            }
            Some("sync_mode") => {
                let value = field.text().await?;
                sync_mode = parse_flag(&value);
            }
            _ => {}
        }
    }

    let Some((file_name, content_type, data)) = file else {
        return Err(AppError::bad_request(r#"There is no "file" in the request."#));
    };

    let id = store_upload(
        &state,
        store,
        new_upload(&user, file_name, content_type, data),
        sync_mode,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "Status": true, "File_id": id })),
    ))
}

/// `GET file/?file_id=`: stream the payload back as an attachment.
pub async fn download_file<S: SelectStore>(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    file_id: FileRef,
) -> Result<Response, AppError> {
    let store = S::select(&state)?;
    let (id, meta) = owned_file(store.as_ref(), file_id.as_deref(), &user).await?;
    let body = store.open(&id).await?;

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&meta.size_bytes.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&meta.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `PUT file/` with `file_id` in the body or query: queue processing.
pub async fn process_file<S: SelectStore>(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    file_id: FileRef,
) -> Result<impl IntoResponse, AppError> {
    let store = S::select(&state)?;
    let (id, _) = owned_file(store.as_ref(), file_id.as_deref(), &user).await?;
    let task_id = queue_processing::<S>(&state, &id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "Status": true, "Task_id": task_id })),
    ))
}

/// `DELETE file/` with `file_id` in the body or query.
pub async fn delete_file<S: SelectStore>(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    file_id: FileRef,
) -> Result<impl IntoResponse, AppError> {
    let store = S::select(&state)?;
    let (id, _) = owned_file(store.as_ref(), file_id.as_deref(), &user).await?;
    let deleted = store.delete(&id).await?;
    info!(backend = %S::BACKEND, file_id = %id, user_id = user.id, "file deleted");

    Ok(Json(json!({ "Status": true, "Files_deleted": deleted })))
}

pub(crate) fn new_upload(
    user: &User,
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
) -> NewUpload {
    NewUpload {
        owner: user.id,
        file_name,
        content_type,
        data,
    }
}

/// Save inline when `sync_mode` is set, otherwise under the upload
/// supervisor. A timed-out upload is a 400 `UPLOAD_TIMED_OUT`.
pub(crate) async fn store_upload<S: SelectStore>(
    state: &AppState,
    store: std::sync::Arc<S>,
    upload: NewUpload,
    sync_mode: bool,
) -> Result<S::Id, AppError> {
    if sync_mode {
        return Ok(upload_service::save_now(store.as_ref(), upload).await?);
    }
    match upload_service::bounded_save(store, upload, state.upload_limits()).await? {
        UploadOutcome::Saved(id) => Ok(id),
        UploadOutcome::TimedOut => Err(AppError::bad_request(UPLOAD_TIMED_OUT)),
    }
}

/// Resolve `raw_id` to a file owned by `user`.
pub(crate) async fn owned_file<S: FileStore>(
    store: &S,
    raw_id: Option<&str>,
    user: &User,
) -> Result<(S::Id, StoredFile<S::Id>), AppError> {
    let raw_id = raw_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("file_id is required"))?;
    let id = store.parse_id(raw_id)?;
    let meta = store.find(&id).await?;
    if meta.owner != user.id {
        return Err(AppError::forbidden("You try to get not yours file."));
    }
    Ok((id, meta))
}

pub(crate) async fn queue_processing<S: FileStore>(
    state: &AppState,
    id: &S::Id,
) -> Result<String, AppError> {
    let task_id = state
        .tasks
        .enqueue(Job::ProcessFile {
            backend: S::BACKEND,
            file_id: id.to_string(),
        })
        .await?;
    info!(backend = %S::BACKEND, file_id = %id, task_id = %task_id, "file processing queued");
    Ok(task_id)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `attachment` disposition with an ASCII fallback name and the exact name
/// percent-encoded in `filename*`.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let mut encoded = String::with_capacity(file_name.len());
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{:02X}", byte);
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_escapes_names() {
        assert_eq!(
            content_disposition("report.csv"),
            "attachment; filename=\"report.csv\"; filename*=UTF-8''report.csv"
        );
        assert_eq!(
            content_disposition("отчёт \"1\".txt"),
            "attachment; filename=\"_____ _1_.txt\"; \
             filename*=UTF-8''%D0%BE%D1%82%D1%87%D1%91%D1%82%20%221%22.txt"
        );
    }

    #[test]
    fn sync_mode_flag_values() {
        for on in ["true", "True", "1", "on", " yes "] {
            assert!(parse_flag(on), "{}", on);
        }
        for off in ["false", "0", "", "nope"] {
            assert!(!parse_flag(off), "{}", off);
        }
    }
}
