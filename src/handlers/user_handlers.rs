//! Account endpoints under `user/`.

use crate::{
    errors::AppError,
    handlers::{auth::AuthUser, extract::Payload},
    models::user::UserDetails,
    services::auth_service::UserInput,
    state::AppState,
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub email: Option<String>,
    pub token: Option<String>,
}

/// `POST user/register/`
pub async fn register(
    State(state): State<AppState>,
    Payload(input): Payload<UserInput>,
) -> Result<impl IntoResponse, AppError> {
    let registered = state.auth.register(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "Status": true,
            "Task_id": registered.task_id,
            "Token": registered.confirm_token,
        })),
    ))
}

/// `POST user/register/confirm/`
pub async fn confirm(
    State(state): State<AppState>,
    Payload(req): Payload<ConfirmRequest>,
) -> Result<StatusCode, AppError> {
    state
        .auth
        .confirm(req.email.as_deref(), req.token.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST user/login/`
pub async fn login(
    State(state): State<AppState>,
    Payload(input): Payload<UserInput>,
) -> Result<impl IntoResponse, AppError> {
    let logged_in = state
        .auth
        .login(input.email.as_deref(), input.password.as_deref())
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "Status": true,
            "Token": logged_in.token,
            "Task_id": logged_in.task_id,
        })),
    ))
}

/// `POST user/logout/`
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, AppError> {
    state.auth.logout(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE user/delete/`
pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<StatusCode, AppError> {
    state.delete_account(&user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET user/details/`
pub async fn details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Json<UserDetails> {
    Json(state.auth.details(&user))
}

/// `POST user/details/`: partial update; the summary is mailed to the user.
pub async fn update_details(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(input): Payload<UserInput>,
) -> Result<impl IntoResponse, AppError> {
    let task_id = state.auth.update_details(&user, input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "Status": true, "Task_id": task_id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: Option<String>,
    pub password: Option<String>,
}

/// `POST user/password_reset/`: mail a reset token to the account owner.
pub async fn password_reset(
    State(state): State<AppState>,
    Payload(req): Payload<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    let task_id = state
        .auth
        .request_password_reset(req.email.as_deref())
        .await?;
    Ok(Json(json!({ "Status": true, "Task_id": task_id })))
}

/// `POST user/password_reset/confirm/`
pub async fn password_reset_confirm(
    State(state): State<AppState>,
    Payload(req): Payload<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth
        .confirm_password_reset(req.token.as_deref(), req.password.as_deref())
        .await?;
    Ok(Json(json!({ "Status": true })))
}
