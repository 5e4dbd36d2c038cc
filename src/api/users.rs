/// Registration, activation and password change
use crate::{
    api::extract::JsonBody,
    context::AppContext,
    error::{ApiError, ApiResult},
    mailer::Notification,
    permissions::Permission,
    tokens::{validate_token_plaintext, TokenScope},
    users::{
        validate_email, validate_name, validate_password_plaintext, validate_user,
        ActivateUserRequest, Password, RegisterUserRequest, UpdatePasswordRequest, User,
    },
    validation::Validator,
};
use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

/// `POST /api/v1/users/register`
pub async fn register_user(
    State(ctx): State<AppContext>,
    JsonBody(input): JsonBody<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    // Plaintext rules are checked before hashing; bcrypt silently truncates past 72 bytes.
    let mut v = Validator::new();
    validate_name(&mut v, &input.name);
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    v.into_result()?;

    let password = Password::from_plaintext(&input.password).await?;
    let mut user = User::new(input.name, input.email, password);

    let mut v = Validator::new();
    validate_user(&mut v, &user)?;
    v.into_result()?;

    ctx.users.register(&mut user, &[Permission::MoviesRead]).await?;

    let token = ctx
        .tokens
        .issue(user.id, ctx.config.tokens.activation_ttl, TokenScope::Activation)
        .await?;

    let notifier = ctx.notifier.clone();
    let recipient = user.email.clone();
    let notification = Notification::Welcome {
        user_id: user.id,
        activation_token: token.plaintext,
        expires_in: ctx.config.tokens.activation_ttl,
    };
    ctx.tasks.spawn("send_welcome_email", async move {
        notifier.send(&recipient, &notification).await
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

/// `PUT /api/v1/users/activate`
pub async fn activate_user(
    State(ctx): State<AppContext>,
    JsonBody(input): JsonBody<ActivateUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &input.token);
    v.into_result()?;

    let mut user = ctx
        .tokens
        .resolve(&input.token, TokenScope::Activation)
        .await?
        .ok_or_else(|| ApiError::field("token", "invalid or expired activation token"))?;

    user.activated = true;
    ctx.users.update(&mut user).await?;

    ctx.tokens
        .revoke_all_for_user(TokenScope::Activation, user.id)
        .await?;
    ctx.permissions
        .grant(user.id, &[Permission::MoviesWrite])
        .await?;

    tracing::info!(user_id = user.id, "user activated");
    Ok(Json(json!({ "user": user })))
}

/// `PUT /api/v1/tokens/password-reset`
pub async fn update_user_password(
    State(ctx): State<AppContext>,
    JsonBody(input): JsonBody<UpdatePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut v = Validator::new();
    validate_password_plaintext(&mut v, &input.password);
    validate_token_plaintext(&mut v, &input.token);
    v.into_result()?;

    let mut user = ctx
        .tokens
        .resolve(&input.token, TokenScope::PasswordReset)
        .await?
        .ok_or_else(|| ApiError::field("token", "invalid or expired password reset token"))?;

    user.password = Password::from_plaintext(&input.password).await?;
    ctx.users.update(&mut user).await?;

    ctx.tokens
        .revoke_all_for_user(TokenScope::PasswordReset, user.id)
        .await?;

    tracing::info!(user_id = user.id, "password reset");
    Ok(Json(json!({ "message": "your password was successfully reset" })))
}
