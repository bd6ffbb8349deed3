//! GraphQL mirror of the REST API, served at `graphql/`.
//!
//! Field and argument names are snake_case. Mutations never fail at the
//! GraphQL level for domain errors; they return a [`MutationPayload`]
//! carrying the HTTP-style status, the error messages and a JSON message.

pub mod files;
pub mod task;
pub mod user;

use crate::{
    errors::AppError, models::user::User, services::auth_service::AuthError, state::AppState,
};
use async_graphql::{
    Context, EmptySubscription, Json, MergedObject, Schema, SimpleObject, http::GraphiQLSource,
};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;

pub use user::UserType;

#[derive(MergedObject, Default)]
pub struct QueryRoot(user::UserQuery, task::TaskQuery);

#[derive(MergedObject, Default)]
pub struct MutationRoot(user::UserMutation, files::FileMutation);

pub type AppSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(state: AppState) -> AppSchema {
    Schema::build(
        QueryRoot::default(),
        MutationRoot::default(),
        EmptySubscription,
    )
    .data(state)
    .finish()
}

/// `POST graphql/` executes; `GET graphql/` serves GraphiQL pointed at
/// `endpoint`.
///
/// The GraphQL extractor reads the raw body, so uploads are capped here
/// rather than by `DefaultBodyLimit`.
pub fn routes(schema: AppSchema, endpoint: String, body_limit: usize) -> Router {
    Router::new()
        .route(
            "/graphql/",
            get(move || graphiql(endpoint.clone())).post(graphql_handler),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(schema)
}

async fn graphql_handler(State(schema): State<AppSchema>, req: GraphQLRequest) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn graphiql(endpoint: String) -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint(&endpoint).finish())
}

/// Result of every mutation.
#[derive(SimpleObject, Debug, Default)]
#[graphql(rename_fields = "snake_case")]
pub struct MutationPayload {
    pub status: i32,
    pub errors: Vec<String>,
    pub message: Option<Json<Value>>,
    pub user: Option<UserType>,
}

impl MutationPayload {
    pub fn ok(status: StatusCode, message: Option<Value>) -> Self {
        Self {
            status: i32::from(status.as_u16()),
            message: message.map(Json),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: &User) -> Self {
        self.user = Some(UserType::from(user));
        self
    }

    /// Report an error with its REST status, except that authentication
    /// and ownership failures report 404.
    pub fn failure(err: AppError) -> Self {
        let status = match err.status {
            StatusCode::UNAUTHORIZED => StatusCode::NOT_FOUND,
            StatusCode::FORBIDDEN if err.errors.is_none() => StatusCode::NOT_FOUND,
            other => other,
        };
        Self {
            status: i32::from(status.as_u16()),
            errors: error_messages(&err),
            ..Default::default()
        }
    }
}

impl From<AppError> for MutationPayload {
    fn from(err: AppError) -> Self {
        Self::failure(err)
    }
}

/// Flatten an error into display strings, `field: message` for field maps.
fn error_messages(err: &AppError) -> Vec<String> {
    match &err.errors {
        Some(Value::Object(fields)) => fields
            .iter()
            .flat_map(|(field, messages)| match messages {
                Value::Array(items) => items
                    .iter()
                    .map(|m| match m.as_str() {
                        Some(text) => format!("{}: {}", field, text),
                        None => format!("{}: {}", field, m),
                    })
                    .collect::<Vec<_>>(),
                other => vec![format!("{}: {}", field, other)],
            })
            .collect(),
        Some(Value::Array(items)) => items.iter().map(ToString::to_string).collect(),
        Some(Value::String(message)) => vec![message.clone()],
        _ => vec![err.message.clone()],
    }
}

pub(crate) fn app_state<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a AppState> {
    ctx.data::<AppState>()
}

/// Resolve a token argument; unknown tokens read "Log in required".
pub(crate) async fn authenticate(state: &AppState, token: &str) -> Result<User, AppError> {
    match state.auth.authenticate(token).await {
        Ok(user) => Ok(user),
        Err(AuthError::InvalidToken) => Err(AppError::not_found("Log in required")),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failures_flatten_field_errors() {
        let payload = MutationPayload::failure(AppError::validation(json!({
            "password": ["This password is too short.", "This password is too common."],
        })));
        assert_eq!(payload.status, 400);
        assert_eq!(
            payload.errors,
            vec![
                "password: This password is too short.",
                "password: This password is too common.",
            ]
        );
    }

    #[test]
    fn ownership_and_token_failures_report_not_found() {
        let payload =
            MutationPayload::failure(AppError::forbidden("You try to get not yours file."));
        assert_eq!(payload.status, 404);
        assert_eq!(payload.errors, vec!["You try to get not yours file."]);

        let payload =
            MutationPayload::failure(AppError::new(StatusCode::UNAUTHORIZED, "Invalid token."));
        assert_eq!(payload.status, 404);
    }
}
