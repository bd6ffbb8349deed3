use crate::services::{
    auth_service::AuthError, storage::StorageError, task_queue::TaskError,
    upload_service::UploadError,
};
use axum::{
    Json,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// Error returned by REST handlers, rendered as `{"Status": false, "Error": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Field-level validation errors, rendered under `Errors` instead of `Error`.
    pub errors: Option<Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            errors: None,
        }
    }

    /// A 400 carrying a structured `Errors` payload.
    pub fn validation(errors: Value) -> Self {
        Self::with_errors(StatusCode::BAD_REQUEST, errors)
    }

    /// An error rendered under `Errors` rather than `Error`.
    pub fn with_errors(status: StatusCode, errors: Value) -> Self {
        let message = match &errors {
            Value::String(message) => message.clone(),
            _ => "validation failed".to_string(),
        };
        Self {
            status,
            message,
            errors: Some(errors),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn login_required() -> Self {
        Self::forbidden("Log in required")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }

        let body = match self.errors {
            Some(errors) => json!({ "Status": false, "Errors": errors }),
            None => json!({ "Status": false, "Error": self.message }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Extractor rejections keep axum's status and text, in the API's error shape.
macro_rules! from_rejection {
    ($($rejection:ty),+ $(,)?) => {
        $(
            impl From<$rejection> for AppError {
                fn from(rejection: $rejection) -> Self {
                    AppError::new(rejection.status(), rejection.body_text())
                }
            }
        )+
    };
}

from_rejection!(
    JsonRejection,
    FormRejection,
    QueryRejection,
    MultipartRejection,
    MultipartError,
);

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(_) => AppError::not_found("File not found."),
            StorageError::InvalidFileId(_) => AppError::bad_request(err.to_string()),
            StorageError::InvalidFileName => AppError::bad_request(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingArguments | AuthError::WrongConfirmation => {
                AppError::validation(Value::String(err.to_string()))
            }
            AuthError::Validation(errors) => AppError::validation(errors),
            AuthError::InvalidCredentials | AuthError::Inactive => {
                AppError::with_errors(StatusCode::FORBIDDEN, Value::String(err.to_string()))
            }
            AuthError::InvalidToken => AppError::new(StatusCode::UNAUTHORIZED, err.to_string()),
            AuthError::ResetTokenNotFound | AuthError::ResetTokenExpired => {
                AppError::not_found(err.to_string())
            }
            AuthError::Task(inner) => inner.into(),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<TaskError> for AppError {
    fn from(err: TaskError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Storage(inner) => inner.into(),
            other => AppError::internal(other.to_string()),
        }
    }
}
