//! Route table.
//!
//! ## Structure
//! - `GET  /healthz`, `GET /readyz`: health checks (mounted at root)
//! - under `/api/{version}`:
//!   - `user/register/`, `user/register/confirm/`, `user/login/`,
//!     `user/logout/`, `user/delete/`, `user/details/`,
//!     `user/password_reset/`, `user/password_reset/confirm/`
//!   - `file/` and `file/mongo/`: `POST` upload, `GET` download,
//!     `PUT` process, `DELETE` delete; `file_id` comes from the body
//!     (JSON or form) or the query string
//!   - `celery_status/?task_id=`: task status
//!   - `graphql/`: GraphQL endpoint (GraphiQL on `GET`)

use crate::{
    graphql,
    handlers::{
        file_handlers::{delete_file, download_file, process_file, upload_file},
        health_handlers::{healthz, readyz},
        task_handlers::task_status,
        user_handlers::{
            confirm, delete_account, details, login, logout, password_reset,
            password_reset_confirm, register, update_details,
        },
    },
    services::storage::{DiskStore, MongoStore},
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

/// Build the application router with its state attached.
pub fn routes(state: AppState) -> Router {
    let prefix = state.config.api_prefix();
    let body_limit = state.config.max_upload_bytes;
    let schema = graphql::build_schema(state.clone());

    let api = Router::new()
        .route("/user/register/", post(register))
        .route("/user/register/confirm/", post(confirm))
        .route("/user/login/", post(login))
        .route("/user/logout/", post(logout))
        .route("/user/delete/", delete(delete_account))
        .route("/user/details/", get(details).post(update_details))
        .route("/user/password_reset/", post(password_reset))
        .route("/user/password_reset/confirm/", post(password_reset_confirm))
        .route(
            "/file/",
            post(upload_file::<DiskStore>)
                .get(download_file::<DiskStore>)
                .put(process_file::<DiskStore>)
                .delete(delete_file::<DiskStore>),
        )
        .route(
            "/file/mongo/",
            post(upload_file::<MongoStore>)
                .get(download_file::<MongoStore>)
                .put(process_file::<MongoStore>)
                .delete(delete_file::<MongoStore>),
        )
        .route("/celery_status/", get(task_status))
        .with_state(state.clone())
        .merge(graphql::routes(
            schema,
            format!("{}/graphql/", prefix),
            body_limit,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
        .nest(&prefix, api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
