//! Shared helpers: an app backed by a temp directory, driven with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use uploader::{
    config::AppConfig,
    routes::routes::routes,
    services::mailer::{Mailer, OutboxEmail},
    state::AppState,
};

pub const PASSWORD: &str = "Xk9#mq2!Lp";
pub const BOUNDARY: &str = "----uploader-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _dir: TempDir,
}

/// Build an app over a fresh SQLite database and storage directory.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Like [`spawn_app`], with the test configuration adjusted first.
pub async fn spawn_app_with(configure: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = AppConfig::for_storage(
        dir.path().join("media").display().to_string(),
        format!("sqlite://{}", dir.path().join("uploader.db").display()),
    );
    configure(&mut config);
    let (state, _workers) = uploader::bootstrap(config).await.expect("bootstrap app");

    TestApp {
        router: routes(state.clone()),
        state,
        _dir: dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        (status, headers, body)
    }

    /// Send a JSON request and parse the JSON reply (`Null` for empty bodies).
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Token {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let (status, _, bytes) = self.send(request).await;
        (status, parse_json(&bytes))
    }

    /// Send a urlencoded form body and parse the JSON reply.
    pub async fn form(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: &str,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Token {}", token));
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("valid request");

        let (status, _, bytes) = self.send(request).await;
        (status, parse_json(&bytes))
    }

    /// Emails written for `recipient` so far, oldest first.
    pub async fn outbox(&self, recipient: &str) -> Vec<OutboxEmail> {
        Mailer::new(self.state.db.clone())
            .sent_to(recipient)
            .await
            .expect("read outbox")
    }

    /// Register, confirm and log in; returns the auth token.
    pub async fn login_new_user(&self, email: &str) -> String {
        let (status, body) = self
            .json(
                Method::POST,
                "/api/v1/user/register/",
                None,
                Some(json!({
                    "email": email,
                    "first_name": "Test",
                    "last_name": "User",
                    "password": PASSWORD,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let confirm_token = body["Token"].as_str().expect("confirm token").to_string();

        let (status, _) = self
            .json(
                Method::POST,
                "/api/v1/user/register/confirm/",
                None,
                Some(json!({ "email": email, "token": confirm_token })),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = self
            .json(
                Method::POST,
                "/api/v1/user/login/",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
        body["Token"].as_str().expect("auth token").to_string()
    }

    /// Multipart upload to `uri` (e.g. `/api/v1/file/`).
    pub async fn upload(
        &self,
        uri: &str,
        token: &str,
        file_name: &str,
        data: &[u8],
        sync_mode: bool,
    ) -> (StatusCode, Value) {
        let mut fields = Vec::new();
        if sync_mode {
            fields.push(("sync_mode", "true"));
        }
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Token {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(
                &fields,
                Some(("file", file_name, data)),
            )))
            .expect("valid request");

        let (status, _, bytes) = self.send(request).await;
        (status, parse_json(&bytes))
    }

    /// Poll the task status endpoint until the task is ready.
    pub async fn wait_for_task(&self, task_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self
                .json(
                    Method::GET,
                    &format!("/api/v1/celery_status/?task_id={}", task_id),
                    None,
                    None,
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            if body["Result"] == json!(true) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never finished", task_id);
    }
}

/// Build a multipart body from text fields and at most one file part.
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((name, file_name, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: text/plain\r\n\r\n",
                BOUNDARY, name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn parse_json(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        })
    }
}

/// Regular files below `dir`, recursively.
pub fn files_under(dir: impl AsRef<std::path::Path>) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.as_ref().to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}
