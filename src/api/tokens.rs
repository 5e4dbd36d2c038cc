/// Token issuance endpoints
use crate::{
    api::extract::JsonBody,
    context::AppContext,
    error::{ApiError, ApiResult},
    mailer::Notification,
    tokens::{AuthenticationTokenRequest, PasswordResetTokenRequest, TokenScope},
    users::{validate_email, validate_password_plaintext},
    validation::Validator,
};
use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

/// `POST /api/v1/tokens/auth`
///
/// Unknown email and wrong password produce the same 401.
pub async fn create_authentication_token(
    State(ctx): State<AppContext>,
    JsonBody(input): JsonBody<AuthenticationTokenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    v.into_result()?;

    let user = ctx
        .users
        .get_by_email(&input.email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !user.password.matches(&input.password).await? {
        tracing::debug!(user_id = user.id, "password mismatch");
        return Err(ApiError::InvalidCredentials);
    }

    let token = ctx
        .tokens
        .issue(
            user.id,
            ctx.config.tokens.authentication_ttl,
            TokenScope::Authentication,
        )
        .await?;

    Ok(Json(json!({ "token": token })))
}

/// `POST /api/v1/tokens/password-reset/request`
pub async fn create_password_reset_token(
    State(ctx): State<AppContext>,
    JsonBody(input): JsonBody<PasswordResetTokenRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    v.into_result()?;

    let user = ctx
        .users
        .get_by_email(&input.email)
        .await?
        .ok_or_else(|| ApiError::field("email", "no matching email address found"))?;

    if !user.activated {
        return Err(ApiError::field("email", "user account must be activated"));
    }

    let token = ctx
        .tokens
        .issue(
            user.id,
            ctx.config.tokens.password_reset_ttl,
            TokenScope::PasswordReset,
        )
        .await?;

    let notifier = ctx.notifier.clone();
    let recipient = user.email;
    let notification = Notification::PasswordReset {
        token: token.plaintext,
        expires_in: ctx.config.tokens.password_reset_ttl,
    };
    ctx.tasks.spawn("send_password_reset_email", async move {
        notifier.send(&recipient, &notification).await
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "an email will be sent to you containing password reset instructions"
        })),
    ))
}
