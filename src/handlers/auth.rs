//! `Authorization: Token <key>` extraction.

use crate::{errors::AppError, models::user::User, state::AppState};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

const SCHEME: &str = "Token";

/// The authenticated caller. Rejects with 403 "Log in required" when no
/// token is presented and 401 when the token is unknown.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = token_from_headers(&parts.headers).ok_or_else(AppError::login_required)?;
        let user = state.auth.authenticate(token).await?;
        Ok(AuthUser(user))
    }
}

/// The key of a `Token` authorization header, if any.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, key) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return None;
    }
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}
