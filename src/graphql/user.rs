//! Account queries and mutations.

use super::{MutationPayload, app_state, authenticate};
use crate::{
    errors::AppError,
    models::user::{User, UserDetails},
    services::auth_service::UserInput,
};
use async_graphql::{Context, InputObject, Object, Result as GraphQLResult, SimpleObject};
use axum::http::StatusCode;
use serde_json::json;

#[derive(SimpleObject, Clone, Debug, PartialEq)]
#[graphql(name = "UserModelType", rename_fields = "snake_case")]
pub struct UserType {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl From<UserDetails> for UserType {
    fn from(details: UserDetails) -> Self {
        Self {
            id: details.id,
            email: details.email,
            first_name: details.first_name,
            last_name: details.last_name,
        }
    }
}

impl From<&User> for UserType {
    fn from(user: &User) -> Self {
        UserDetails::from(user).into()
    }
}

#[derive(InputObject, Default, Debug)]
#[graphql(name = "UserInput", rename_fields = "snake_case")]
pub struct UserInputObject {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

impl From<UserInputObject> for UserInput {
    fn from(input: UserInputObject) -> Self {
        Self {
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            password: input.password,
        }
    }
}

#[derive(Default)]
pub struct UserQuery;

#[Object(rename_fields = "snake_case", rename_args = "snake_case")]
impl UserQuery {
    /// The user owning `token`.
    async fn user(&self, ctx: &Context<'_>, token: String) -> GraphQLResult<UserType> {
        let state = app_state(ctx)?;
        let user = authenticate(state, &token)
            .await
            .map_err(|err| err.message)?;
        Ok(UserType::from(&user))
    }
}

#[derive(Default)]
pub struct UserMutation;

#[Object(rename_fields = "snake_case", rename_args = "snake_case")]
impl UserMutation {
    async fn user_create(
        &self,
        ctx: &Context<'_>,
        input: UserInputObject,
    ) -> GraphQLResult<MutationPayload> {
        let state = app_state(ctx)?;
        Ok(match state.auth.register(input.into()).await {
            Ok(registered) => MutationPayload::ok(
                StatusCode::CREATED,
                Some(json!({
                    "task_id": registered.task_id,
                    "token": registered.confirm_token,
                })),
            )
            .with_user(&registered.user),
            Err(err) => AppError::from(err).into(),
        })
    }

    async fn user_confirm(
        &self,
        ctx: &Context<'_>,
        token: String,
        input: UserInputObject,
    ) -> GraphQLResult<MutationPayload> {
        let state = app_state(ctx)?;
        Ok(
            match state.auth.confirm(input.email.as_deref(), Some(token.as_str())).await {
                Ok(()) => MutationPayload::ok(StatusCode::NO_CONTENT, None),
                Err(err) => AppError::from(err).into(),
            },
        )
    }

    async fn user_login(
        &self,
        ctx: &Context<'_>,
        input: UserInputObject,
    ) -> GraphQLResult<MutationPayload> {
        let state = app_state(ctx)?;
        let login = state
            .auth
            .login(input.email.as_deref(), input.password.as_deref())
            .await;
        Ok(match login {
            Ok(logged_in) => MutationPayload::ok(
                StatusCode::ACCEPTED,
                Some(json!({ "task_id": logged_in.task_id, "token": logged_in.token })),
            )
            .with_user(&logged_in.user),
            Err(err) => AppError::from(err).into(),
        })
    }

    async fn user_logout(&self, ctx: &Context<'_>, token: String) -> GraphQLResult<MutationPayload> {
        let state = app_state(ctx)?;
        let result = async {
            let user = authenticate(state, &token).await?;
            state.auth.logout(&user).await?;
            Ok::<_, AppError>(MutationPayload::ok(StatusCode::NO_CONTENT, None))
        };
        Ok(result.await.unwrap_or_else(MutationPayload::failure))
    }

    async fn user_delete(&self, ctx: &Context<'_>, token: String) -> GraphQLResult<MutationPayload> {
        let state = app_state(ctx)?;
        let result = async {
            let user = authenticate(state, &token).await?;
            state.delete_account(&user).await?;
            Ok::<_, AppError>(MutationPayload::ok(StatusCode::NO_CONTENT, None))
        };
        Ok(result.await.unwrap_or_else(MutationPayload::failure))
    }

    /// Partial update of the token owner's details.
    async fn user_update(
        &self,
        ctx: &Context<'_>,
        token: String,
        input: UserInputObject,
    ) -> GraphQLResult<MutationPayload> {
        let state = app_state(ctx)?;
        let result = async {
            let user = authenticate(state, &token).await?;
            let task_id = state.auth.update_details(&user, input.into()).await?;
            let updated = state.auth.authenticate(&token).await?;
            Ok::<_, AppError>(
                MutationPayload::ok(StatusCode::ACCEPTED, Some(json!({ "task_id": task_id })))
                    .with_user(&updated),
            )
        };
        Ok(result.await.unwrap_or_else(MutationPayload::failure))
    }
}
