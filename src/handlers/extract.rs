//! Extractors that accept what clients actually send (JSON or urlencoded
//! forms) and turn every rejection into an [`AppError`].

use crate::errors::AppError;
use axum::{
    Form, Json,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{HeaderMap, header, request::Parts},
};
use serde::{Deserialize, de::DeserializeOwned};

/// Request body decoded as a urlencoded form when the `Content-Type` says
/// so, as JSON otherwise.
#[derive(Debug)]
pub struct Payload<T>(pub T);

impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_form(req.headers()) {
            let Form(value) = Form::<T>::from_request(req, state).await?;
            Ok(Self(value))
        } else {
            let Json(value) = Json::<T>::from_request(req, state).await?;
            Ok(Self(value))
        }
    }
}

/// Query string with rejections rendered as `AppError`.
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// The `file_id` a request refers to: taken from the body (JSON or form)
/// when there is one, from the query string otherwise.
#[derive(Debug, Default)]
pub struct FileRef(pub Option<String>);

impl FileRef {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct FileIdQuery {
    file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileIdBody {
    file_id: Option<FileIdValue>,
}

/// JSON clients send numbers for disk ids; forms always send text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileIdValue {
    Number(i64),
    Text(String),
}

impl From<FileIdValue> for String {
    fn from(value: FileIdValue) -> Self {
        match value {
            FileIdValue::Number(id) => id.to_string(),
            FileIdValue::Text(id) => id,
        }
    }
}

impl<S> FromRequest<S> for FileRef
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Query(query) = Query::<FileIdQuery>::try_from_uri(req.uri())?;
        let from_body = if has_body(req.headers()) {
            let Payload(body) = Payload::<FileIdBody>::from_request(req, state).await?;
            body.file_id.map(String::from)
        } else {
            None
        };
        Ok(Self(from_body.or(query.file_id)))
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
}

fn has_body(headers: &HeaderMap) -> bool {
    let empty = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "0");
    headers.contains_key(header::CONTENT_TYPE) && !empty
}
