/// Unified error types for the Blackbox API
use crate::validation::FieldErrors;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use thiserror::Error;

/// Main error type for the API
#[derive(Error, Debug)]
pub enum ApiError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed request body or parameters
    #[error("{0}")]
    BadRequest(String),

    /// Field-level validation failures
    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("The requested resource could not be found")]
    NotFound,

    /// A conditional write found a different version than expected
    #[error("Unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("A user with this email address already exists")]
    DuplicateEmail,

    #[error("Invalid authentication credentials")]
    InvalidCredentials,

    #[error("Invalid or missing authentication token")]
    InvalidAuthenticationToken,

    #[error("You must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("Your user account must be activated to access this resource")]
    InactiveAccount,

    #[error("Your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// A storage call did not finish within the configured limit
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A programming invariant did not hold
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Validation failure on a single field
    pub fn field(key: &str, message: &str) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(key.to_string(), message.to_string());
        ApiError::Validation(fields)
    }

    /// HTTP status and machine-readable code
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            ApiError::DuplicateEmail => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::EditConflict => (StatusCode::CONFLICT, "edit_conflict"),
            ApiError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            ApiError::InvalidAuthenticationToken => {
                (StatusCode::UNAUTHORIZED, "invalid_authentication_token")
            }
            ApiError::AuthenticationRequired => {
                (StatusCode::UNAUTHORIZED, "authentication_required")
            }
            ApiError::InactiveAccount => (StatusCode::FORBIDDEN, "inactive_account"),
            ApiError::NotPermitted => (StatusCode::FORBIDDEN, "not_permitted"),
            ApiError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded")
            }
            ApiError::Database(_)
            | ApiError::Timeout(_)
            | ApiError::Invariant(_)
            | ApiError::Internal(_)
            | ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error"),
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            match &self {
                ApiError::Invariant(_) => tracing::error!(
                    error = %self,
                    backtrace = %Backtrace::capture(),
                    "invariant violation"
                ),
                _ => tracing::error!(
                    error = %self,
                    backtrace = %Backtrace::capture(),
                    "request failed"
                ),
            }
        }

        let (message, fields) = match &self {
            ApiError::Validation(fields) => (self.to_string(), Some(fields.clone())),
            ApiError::DuplicateEmail => {
                let mut fields = FieldErrors::new();
                fields.insert("email".to_string(), self.to_string());
                ("Validation failed".to_string(), Some(fields))
            }
            // Don't leak details
            _ if status.is_server_error() => (
                "The server encountered a problem and could not process your request".to_string(),
                None,
            ),
            _ => (self.to_string(), None),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
            fields,
        });

        let mut response = (status, body).into_response();
        match self {
            ApiError::InvalidAuthenticationToken => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer"),
                );
            }
            ApiError::RateLimitExceeded { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            _ => {}
        }
        response
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_token_sets_challenge_header() {
        let response = ApiError::InvalidAuthenticationToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_reports_email_field() {
        let response = ApiError::DuplicateEmail.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(
            body["fields"]["email"],
            "A user with this email address already exists"
        );
    }

    #[tokio::test]
    async fn test_server_errors_hide_details() {
        let response = ApiError::Invariant("sort column".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("sort column"));
        assert_eq!(body["error"], "internal_server_error");
    }

    #[tokio::test]
    async fn test_rate_limit_sets_retry_after() {
        let response = ApiError::RateLimitExceeded {
            retry_after: std::time::Duration::from_secs(3),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn test_auth_failures_are_distinct() {
        assert_eq!(
            ApiError::AuthenticationRequired.status_and_code().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InactiveAccount.status_and_code().0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::NotPermitted.status_and_code().0, StatusCode::FORBIDDEN);
        assert_eq!(ApiError::EditConflict.status_and_code().0, StatusCode::CONFLICT);
    }
}
