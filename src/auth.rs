/// Caller identity and permission checks
use crate::{
    error::{ApiError, ApiResult},
    metrics,
    permissions::{Permission, PermissionManager},
    users::User,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Who is making the request.
///
/// Set by the authentication middleware on every request; requests without
/// an `Authorization` header carry [`Identity::Anonymous`].
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    User(User),
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::Invariant("missing identity in request context".to_string()))
    }
}

/// Check that `identity` may perform an operation requiring `required`.
///
/// Anonymous callers need to authenticate (401). Known users must be
/// activated and hold the code (403 otherwise).
pub async fn authorize(
    permissions: &PermissionManager,
    identity: &Identity,
    required: Permission,
) -> ApiResult<()> {
    let user = match identity {
        Identity::Anonymous => {
            metrics::record_authorization_failure("authentication_required");
            return Err(ApiError::AuthenticationRequired);
        }
        Identity::User(user) => user,
    };

    if !user.activated {
        metrics::record_authorization_failure("inactive_account");
        return Err(ApiError::InactiveAccount);
    }

    let granted = permissions.for_user(user.id).await?;
    if !granted.contains(required.as_str()) {
        metrics::record_authorization_failure("not_permitted");
        tracing::debug!(
            user_id = user.id,
            permission = %required,
            granted = ?granted.iter().collect::<Vec<_>>(),
            "permission denied"
        );
        return Err(ApiError::NotPermitted);
    }

    Ok(())
}
