//! Accounts and opaque-token authentication.
//!
//! Registration creates an inactive user plus a confirmation token mailed to
//! the user; confirming activates the account. Login hands out one auth
//! token per user, which every authenticated request presents.

use crate::{
    models::user::{User, UserDetails},
    services::{
        cache::TokenCache,
        task_queue::{Job, TaskError, TaskQueue},
    },
};
use argon2::{
    Argon2,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

const PASSWORD_MIN_LENGTH: usize = 8;
const NAME_MAX_LENGTH: usize = 150;
const RESET_TOKEN_TTL_HOURS: i64 = 24;
const EMAIL_TAKEN: &str = "user with this email already exists.";
const COMMON_PASSWORDS: [&str; 20] = [
    "password", "password1", "password123", "12345678", "123456789", "1234567890",
    "qwerty123", "qwertyuiop", "iloveyou", "sunshine", "princess", "football",
    "baseball", "welcome1", "admin123", "letmein1", "trustno1", "superman",
    "1q2w3e4r", "abc12345",
];

const SELECT_USER: &str =
    "SELECT id, email, first_name, last_name, password_hash, is_active, date_joined FROM users";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not all required arguments are provided")]
    MissingArguments,
    #[error("validation failed: {0}")]
    Validation(Value),
    #[error("Wrong token or email")]
    WrongConfirmation,
    #[error("Could not authorize")]
    InvalidCredentials,
    #[error("User is not active")]
    Inactive,
    #[error("Invalid token.")]
    InvalidToken,
    #[error("The password reset token is invalid.")]
    ResetTokenNotFound,
    #[error("The password reset token has expired.")]
    ResetTokenExpired,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Account fields as sent by clients. Every field is optional so the same
/// shape serves registration, login, confirmation and partial updates.
#[derive(Deserialize, Default, Clone, Debug)]
pub struct UserInput {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug)]
pub struct Registered {
    pub user: User,
    pub confirm_token: String,
    pub task_id: String,
}

#[derive(Debug)]
pub struct LoggedIn {
    pub user: User,
    pub token: String,
    pub task_id: String,
}

#[derive(Clone)]
pub struct AuthService {
    db: Arc<SqlitePool>,
    cache: TokenCache,
    tasks: TaskQueue,
}

impl AuthService {
    pub fn new(db: Arc<SqlitePool>, cache: TokenCache, tasks: TaskQueue) -> Self {
        Self { db, cache, tasks }
    }

    pub async fn register(&self, input: UserInput) -> AuthResult<Registered> {
        let (Some(email), Some(first_name), Some(last_name), Some(password)) = (
            input.email,
            input.first_name,
            input.last_name,
            input.password,
        ) else {
            return Err(AuthError::MissingArguments);
        };

        let email = normalize_email(&email);
        let password_errors = validate_password(&password, Some(&email));
        if !password_errors.is_empty() {
            return Err(AuthError::Validation(json!({ "password": password_errors })));
        }

        let mut errors = Map::new();
        self.check_email(&email, None, &mut errors).await?;
        check_name("first_name", &first_name, &mut errors);
        check_name("last_name", &last_name, &mut errors);
        if !errors.is_empty() {
            return Err(AuthError::Validation(Value::Object(errors)));
        }

        let password_hash = hash_password(&password)?;
        let confirm_token = new_token();

        let mut tx = self.db.begin().await?;
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (email, first_name, last_name, password_hash, is_active, date_joined)
             VALUES (?, ?, ?, ?, 0, ?)
             RETURNING id, email, first_name, last_name, password_hash, is_active, date_joined",
        )
        .bind(&email)
        .bind(&first_name)
        .bind(&last_name)
        .bind(&password_hash)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(email_conflict)?;
        sqlx::query("INSERT INTO confirm_email_tokens (key, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&confirm_token)
            .bind(user.id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let task_id = self
            .tasks
            .enqueue(Job::SendEmail {
                recipient: user.email.clone(),
                subject: format!("Token confirmation for {}", user.email),
                body: confirm_token.clone(),
            })
            .await?;

        info!(user_id = user.id, "registered user");
        Ok(Registered {
            user,
            confirm_token,
            task_id,
        })
    }

    /// Activate the account owning `token`.
    pub async fn confirm(&self, email: Option<&str>, token: Option<&str>) -> AuthResult<()> {
        let (Some(email), Some(token)) = (email, token) else {
            return Err(AuthError::MissingArguments);
        };
        let email = normalize_email(email);

        let user_id: Option<i64> = sqlx::query_scalar(
            "SELECT t.user_id FROM confirm_email_tokens t
             JOIN users u ON u.id = t.user_id
             WHERE u.email = ? AND t.key = ?",
        )
        .bind(&email)
        .bind(token)
        .fetch_optional(&*self.db)
        .await?;
        let Some(user_id) = user_id else {
            return Err(AuthError::WrongConfirmation);
        };

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE users SET is_active = 1 WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM confirm_email_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user_id, "confirmed email");
        Ok(())
    }

    /// Check credentials and return the user's auth token, creating it on
    /// first login.
    pub async fn login(&self, email: Option<&str>, password: Option<&str>) -> AuthResult<LoggedIn> {
        let (Some(email), Some(password)) = (email, password) else {
            return Err(AuthError::MissingArguments);
        };
        let email = normalize_email(email);

        let user = sqlx::query_as::<_, User>(&format!("{} WHERE email = ?", SELECT_USER))
            .bind(&email)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::Inactive);
        }

        let existing: Option<String> =
            sqlx::query_scalar("SELECT key FROM auth_tokens WHERE user_id = ?")
                .bind(user.id)
                .fetch_optional(&*self.db)
                .await?;
        let token = match existing {
            Some(token) => token,
            None => {
                let token = new_token();
                sqlx::query("INSERT INTO auth_tokens (key, user_id, created_at) VALUES (?, ?, ?)")
                    .bind(&token)
                    .bind(user.id)
                    .bind(Utc::now())
                    .execute(&*self.db)
                    .await?;
                token
            }
        };

        let task_id = self
            .tasks
            .enqueue(Job::SendEmail {
                recipient: user.email.clone(),
                subject: format!("Token login for {}", user.email),
                body: token.clone(),
            })
            .await?;

        info!(user_id = user.id, "user logged in");
        Ok(LoggedIn {
            user,
            token,
            task_id,
        })
    }

    /// Resolve an auth token to its active user.
    pub async fn authenticate(&self, token: &str) -> AuthResult<User> {
        if let Some(user) = self.cache.get(token).await {
            return Ok(user);
        }

        let user = sqlx::query_as::<_, User>(
            "SELECT u.id, u.email, u.first_name, u.last_name, u.password_hash, u.is_active,
                    u.date_joined
             FROM users u JOIN auth_tokens t ON t.user_id = u.id
             WHERE t.key = ?",
        )
        .bind(token)
        .fetch_optional(&*self.db)
        .await?
        .filter(|user| user.is_active)
        .ok_or(AuthError::InvalidToken)?;

        self.cache.insert(token, user.clone()).await;
        Ok(user)
    }

    pub async fn logout(&self, user: &User) -> AuthResult<()> {
        sqlx::query("DELETE FROM auth_tokens WHERE user_id = ?")
            .bind(user.id)
            .execute(&*self.db)
            .await?;
        self.cache.clear().await;
        info!(user_id = user.id, "user logged out");
        Ok(())
    }

    /// Remove the account and its tokens. Files are purged by the caller.
    pub async fn delete_user(&self, user: &User) -> AuthResult<()> {
        let mut tx = self.db.begin().await?;
        for stmt in [
            "DELETE FROM auth_tokens WHERE user_id = ?",
            "DELETE FROM confirm_email_tokens WHERE user_id = ?",
            "DELETE FROM password_reset_tokens WHERE user_id = ?",
            "DELETE FROM users WHERE id = ?",
        ] {
            sqlx::query(stmt).bind(user.id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        self.cache.clear().await;
        info!(user_id = user.id, "deleted user");
        Ok(())
    }

    pub fn details(&self, user: &User) -> UserDetails {
        UserDetails::from(user)
    }

    /// Apply a partial update and mail the user a summary. Returns the
    /// email task id.
    pub async fn update_details(&self, user: &User, input: UserInput) -> AuthResult<String> {
        let email = input.email.as_deref().map(normalize_email);

        let password_hash = match input.password.as_deref() {
            Some(password) => {
                let errors =
                    validate_password(password, Some(email.as_deref().unwrap_or(&user.email)));
                if !errors.is_empty() {
                    return Err(AuthError::Validation(json!({ "password": errors })));
                }
                Some(hash_password(password)?)
            }
            None => None,
        };

        let mut errors = Map::new();
        if let Some(email) = &email {
            self.check_email(email, Some(user.id), &mut errors).await?;
        }
        if let Some(first_name) = &input.first_name {
            check_name("first_name", first_name, &mut errors);
        }
        if let Some(last_name) = &input.last_name {
            check_name("last_name", last_name, &mut errors);
        }
        if !errors.is_empty() {
            return Err(AuthError::Validation(Value::Object(errors)));
        }

        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET
                email = COALESCE(?, email),
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                password_hash = COALESCE(?, password_hash)
             WHERE id = ?
             RETURNING id, email, first_name, last_name, password_hash, is_active, date_joined",
        )
        .bind(email.as_deref())
        .bind(input.first_name.as_deref())
        .bind(input.last_name.as_deref())
        .bind(password_hash.as_deref())
        .bind(user.id)
        .fetch_one(&*self.db)
        .await
        .map_err(email_conflict)?;
        self.cache.clear().await;

        let mut body = format!(
            "The details were changed. New details: email={}, first_name={}, last_name={}",
            updated.email, updated.first_name, updated.last_name
        );
        if password_hash.is_some() {
            body.push_str(". The password was changed.");
        }
        let task_id = self
            .tasks
            .enqueue(Job::SendEmail {
                recipient: updated.email.clone(),
                subject: "Change details.".into(),
                body,
            })
            .await?;

        info!(user_id = user.id, "updated user details");
        Ok(task_id)
    }

    /// Mail the owner of `email` a password reset token, reusing one that
    /// has not expired yet. Returns the email task id.
    pub async fn request_password_reset(&self, email: Option<&str>) -> AuthResult<String> {
        let Some(email) = email else {
            return Err(AuthError::MissingArguments);
        };
        let email = normalize_email(email);

        let user = sqlx::query_as::<_, User>(&format!("{} WHERE email = ?", SELECT_USER))
            .bind(&email)
            .fetch_optional(&*self.db)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| {
                AuthError::Validation(json!({
                    "email": ["We couldn't find an account associated with that email. \
                               Please try a different e-mail address."],
                }))
            })?;

        let existing: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT key, created_at FROM password_reset_tokens
             WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user.id)
        .fetch_optional(&*self.db)
        .await?;
        let token = match existing {
            Some((token, created_at)) if !reset_token_expired(created_at) => token,
            _ => {
                let token = new_token();
                let mut tx = self.db.begin().await?;
                sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = ?")
                    .bind(user.id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "INSERT INTO password_reset_tokens (key, user_id, created_at) VALUES (?, ?, ?)",
                )
                .bind(&token)
                .bind(user.id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                token
            }
        };

        let task_id = self
            .tasks
            .enqueue(Job::SendEmail {
                recipient: user.email.clone(),
                subject: format!("Password Reset Token for {}", user.email),
                body: token,
            })
            .await?;

        info!(user_id = user.id, "password reset requested");
        Ok(task_id)
    }

    /// Set a new password for the owner of a reset token. Every reset token
    /// of that user is spent.
    pub async fn confirm_password_reset(
        &self,
        token: Option<&str>,
        password: Option<&str>,
    ) -> AuthResult<()> {
        let (Some(token), Some(password)) = (token, password) else {
            return Err(AuthError::MissingArguments);
        };

        let row: Option<(i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT user_id, created_at FROM password_reset_tokens WHERE key = ?")
                .bind(token.trim())
                .fetch_optional(&*self.db)
                .await?;
        let Some((user_id, created_at)) = row else {
            return Err(AuthError::ResetTokenNotFound);
        };
        if reset_token_expired(created_at) {
            sqlx::query("DELETE FROM password_reset_tokens WHERE key = ?")
                .bind(token.trim())
                .execute(&*self.db)
                .await?;
            return Err(AuthError::ResetTokenExpired);
        }

        let user = sqlx::query_as::<_, User>(&format!("{} WHERE id = ?", SELECT_USER))
            .bind(user_id)
            .fetch_one(&*self.db)
            .await?;
        let errors = validate_password(password, Some(&user.email));
        if !errors.is_empty() {
            return Err(AuthError::Validation(json!({ "password": errors })));
        }
        let password_hash = hash_password(password)?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(&password_hash)
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = ?")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.cache.clear().await;

        info!(user_id = user.id, "password reset");
        Ok(())
    }

    async fn check_email(
        &self,
        email: &str,
        current_user: Option<i64>,
        errors: &mut Map<String, Value>,
    ) -> AuthResult<()> {
        if !is_valid_email(email) {
            errors.insert("email".into(), json!(["Enter a valid email address."]));
            return Ok(());
        }
        let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&*self.db)
            .await?;
        if matches!(taken, Some(id) if Some(id) != current_user) {
            errors.insert("email".into(), json!([EMAIL_TAKEN]));
        }
        Ok(())
    }
}

fn check_name(field: &str, value: &str, errors: &mut Map<String, Value>) {
    if value.chars().count() > NAME_MAX_LENGTH {
        errors.insert(
            field.into(),
            json!([format!(
                "Ensure this field has no more than {} characters.",
                NAME_MAX_LENGTH
            )]),
        );
    }
}

/// Two writers can both pass the availability check; the UNIQUE index
/// settles the race.
fn email_conflict(err: sqlx::Error) -> AuthError {
    match err.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => {
            AuthError::Validation(json!({ "email": [EMAIL_TAKEN] }))
        }
        _ => AuthError::Sqlx(err),
    }
}

fn reset_token_expired(created_at: DateTime<Utc>) -> bool {
    created_at + Duration::hours(RESET_TOKEN_TTL_HOURS) < Utc::now()
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Trim and lowercase the domain part.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !local.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// Password policy; returns every violated rule.
pub fn validate_password(password: &str, email: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();

    if password.chars().count() < PASSWORD_MIN_LENGTH {
        errors.push(format!(
            "This password is too short. It must contain at least {} characters.",
            PASSWORD_MIN_LENGTH
        ));
    }
    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        errors.push("This password is too common.".to_string());
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        errors.push("This password is entirely numeric.".to_string());
    }
    if let Some(local) = email.and_then(|e| e.split('@').next()) {
        let local = local.to_lowercase();
        if local.len() >= 3 && (lowered.contains(&local) || local.contains(&lowered)) {
            errors.push("The password is too similar to the email address.".to_string());
        }
    }

    errors
}

fn hash_password(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> AuthResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Hash(e.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::Hash(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        services::{jobs::JobRunner, mailer::Mailer, storage::DiskStore},
    };
    use std::time::Duration;

    const PASSWORD: &str = "Xk9#mq2!Lp";

    async fn service(dir: &std::path::Path) -> AuthService {
        let pool = Arc::new(db::connect_for_tests(dir).await);
        let disk = Arc::new(DiskStore::new(pool.clone(), dir.join("media")));
        let runner = JobRunner::new(Mailer::new(pool.clone()), disk, None);
        let (tasks, _workers) = TaskQueue::start(pool.clone(), 1, Arc::new(runner));
        AuthService::new(pool, TokenCache::new(Duration::from_secs(60)), tasks)
    }

    fn input(email: &str) -> UserInput {
        UserInput {
            email: Some(email.into()),
            first_name: Some("Jane".into()),
            last_name: Some("Doe".into()),
            password: Some(PASSWORD.into()),
        }
    }

    #[tokio::test]
    async fn register_confirm_login_logout() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;

        let registered = auth.register(input("jane@example.com")).await.unwrap();
        assert!(!registered.user.is_active);
        assert_eq!(registered.confirm_token.len(), 32);

        let err = auth
            .login(Some("jane@example.com"), Some(PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Inactive));

        let err = auth
            .confirm(Some("jane@example.com"), Some("not-the-token"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WrongConfirmation));
        auth.confirm(Some("jane@example.com"), Some(registered.confirm_token.as_str()))
            .await
            .unwrap();

        let first = auth.login(Some("jane@example.com"), Some(PASSWORD)).await.unwrap();
        let second = auth.login(Some("jane@example.com"), Some(PASSWORD)).await.unwrap();
        assert_eq!(first.token, second.token);
        assert_ne!(first.task_id, second.task_id);

        let user = auth.authenticate(&first.token).await.unwrap();
        assert_eq!(user.email, "jane@example.com");

        auth.logout(&user).await.unwrap();
        assert!(matches!(
            auth.authenticate(&first.token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;

        let mut missing = input("a@example.com");
        missing.last_name = None;
        assert!(matches!(
            auth.register(missing).await,
            Err(AuthError::MissingArguments)
        ));

        let mut weak = input("a@example.com");
        weak.password = Some("123".into());
        let Err(AuthError::Validation(errors)) = auth.register(weak).await else {
            panic!("weak password accepted");
        };
        assert_eq!(errors["password"].as_array().unwrap().len(), 2);

        auth.register(input("a@example.com")).await.unwrap();
        let Err(AuthError::Validation(errors)) = auth.register(input("a@EXAMPLE.com")).await
        else {
            panic!("duplicate email accepted");
        };
        assert_eq!(errors["email"][0], "user with this email already exists.");
    }

    #[tokio::test]
    async fn wrong_password_does_not_authorize() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        auth.register(input("b@example.com")).await.unwrap();

        assert!(matches!(
            auth.login(Some("b@example.com"), Some("Wrong#pass1")).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login(Some("nobody@example.com"), Some(PASSWORD)).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login(Some("b@example.com"), None).await,
            Err(AuthError::MissingArguments)
        ));
    }

    #[tokio::test]
    async fn update_details_changes_fields_and_password() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        let registered = auth.register(input("c@example.com")).await.unwrap();
        auth.confirm(Some("c@example.com"), Some(registered.confirm_token.as_str()))
            .await
            .unwrap();
        let token = auth.login(Some("c@example.com"), Some(PASSWORD)).await.unwrap().token;
        let user = auth.authenticate(&token).await.unwrap();

        auth.update_details(
            &user,
            UserInput {
                first_name: Some("Janet".into()),
                password: Some("N3w&Better!".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let user = auth.authenticate(&token).await.unwrap();
        assert_eq!(auth.details(&user).first_name, "Janet");
        assert_eq!(auth.details(&user).last_name, "Doe");
        assert!(auth.login(Some("c@example.com"), Some("N3w&Better!")).await.is_ok());

        let Err(AuthError::Validation(errors)) = auth
            .update_details(
                &user,
                UserInput {
                    email: Some("not-an-email".into()),
                    ..Default::default()
                },
            )
            .await
        else {
            panic!("invalid email accepted");
        };
        assert_eq!(errors["email"][0], "Enter a valid email address.");
    }

    #[tokio::test]
    async fn delete_user_revokes_token() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        let registered = auth.register(input("d@example.com")).await.unwrap();
        auth.confirm(Some("d@example.com"), Some(registered.confirm_token.as_str()))
            .await
            .unwrap();
        let token = auth.login(Some("d@example.com"), Some(PASSWORD)).await.unwrap().token;
        let user = auth.authenticate(&token).await.unwrap();

        auth.delete_user(&user).await.unwrap();
        assert!(matches!(
            auth.authenticate(&token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    async fn active_user(auth: &AuthService, email: &str) {
        let registered = auth.register(input(email)).await.unwrap();
        auth.confirm(Some(email), Some(registered.confirm_token.as_str()))
            .await
            .unwrap();
    }

    async fn reset_token_of(auth: &AuthService, email: &str) -> String {
        sqlx::query_scalar(
            "SELECT t.key FROM password_reset_tokens t JOIN users u ON u.id = t.user_id
             WHERE u.email = ?",
        )
        .bind(email)
        .fetch_one(&*auth.db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn password_reset_sets_new_password() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        active_user(&auth, "e@example.com").await;

        auth.request_password_reset(Some("e@example.com")).await.unwrap();
        let token = reset_token_of(&auth, "e@example.com").await;
        // a second request within the lifetime reuses the token
        auth.request_password_reset(Some("e@example.com")).await.unwrap();
        assert_eq!(reset_token_of(&auth, "e@example.com").await, token);

        let Err(AuthError::Validation(errors)) = auth
            .confirm_password_reset(Some(token.as_str()), Some("1234"))
            .await
        else {
            panic!("weak password accepted");
        };
        assert!(errors["password"].as_array().is_some_and(|e| !e.is_empty()));

        auth.confirm_password_reset(Some(token.as_str()), Some("Fresh#Pass42"))
            .await
            .unwrap();
        assert!(matches!(
            auth.login(Some("e@example.com"), Some(PASSWORD)).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(auth.login(Some("e@example.com"), Some("Fresh#Pass42")).await.is_ok());

        // spent
        assert!(matches!(
            auth.confirm_password_reset(Some(token.as_str()), Some("Other#Pass42")).await,
            Err(AuthError::ResetTokenNotFound)
        ));
    }

    #[tokio::test]
    async fn password_reset_rejects_unknown_and_expired() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;
        active_user(&auth, "f@example.com").await;

        assert!(matches!(
            auth.request_password_reset(Some("ghost@example.com")).await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            auth.request_password_reset(None).await,
            Err(AuthError::MissingArguments)
        ));

        auth.request_password_reset(Some("f@example.com")).await.unwrap();
        let token = reset_token_of(&auth, "f@example.com").await;
        sqlx::query("UPDATE password_reset_tokens SET created_at = ? WHERE key = ?")
            .bind(Utc::now() - chrono::Duration::hours(RESET_TOKEN_TTL_HOURS + 1))
            .bind(&token)
            .execute(&*auth.db)
            .await
            .unwrap();

        assert!(matches!(
            auth.confirm_password_reset(Some(token.as_str()), Some("Fresh#Pass42")).await,
            Err(AuthError::ResetTokenExpired)
        ));
        assert!(matches!(
            auth.confirm_password_reset(Some(token.as_str()), Some("Fresh#Pass42")).await,
            Err(AuthError::ResetTokenNotFound)
        ));

        // an expired token is replaced on the next request
        auth.request_password_reset(Some("f@example.com")).await.unwrap();
        assert_ne!(reset_token_of(&auth, "f@example.com").await, token);
    }

    #[tokio::test]
    async fn concurrent_registrations_of_one_email_yield_one_account() {
        let dir = tempfile::tempdir().unwrap();
        let auth = service(dir.path()).await;

        let attempts = (0..6).map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move { auth.register(input("race@example.com")).await })
        });
        let results = futures::future::join_all(attempts).await;

        let mut created = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => created += 1,
                Err(AuthError::Validation(errors)) => {
                    assert_eq!(errors["email"][0], EMAIL_TAKEN);
                }
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(created, 1);
    }

    #[test]
    fn password_policy_collects_all_violations() {
        let errors = validate_password("1234567", None);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("This password is too short."));
        assert_eq!(errors[1], "This password is entirely numeric.");

        assert_eq!(
            validate_password("Password", None),
            vec!["This password is too common.".to_string()]
        );
        assert_eq!(
            validate_password("johnsmith-2024", Some("johnsmith@example.com")),
            vec!["The password is too similar to the email address.".to_string()]
        );
        assert!(validate_password("Xk9#mq2!Lp", Some("john@example.com")).is_empty());
    }

    #[test]
    fn email_normalization_lowercases_domain_only() {
        assert_eq!(normalize_email("  Jane.Doe@Example.COM "), "Jane.Doe@example.com");
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("a@localhost"));
        assert!(!is_valid_email("a b@c.de"));
    }

    #[test]
    fn hashes_verify_only_their_password() {
        let hash = hash_password("Xk9#mq2!Lp").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Xk9#mq2!Lp", &hash).unwrap());
        assert!(!verify_password("wrong-pass", &hash).unwrap());
    }
}
