/// Request decoding helpers
use crate::{
    error::{ApiError, ApiResult},
    validation::Validator,
};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::collections::HashMap;

/// Maximum accepted request body
pub const MAX_BODY_BYTES: usize = 1_048_576;

/// JSON body whose rejections come back as `400` in the API's error shape
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(json_rejection_to_error(rejection)),
        }
    }
}

fn json_rejection_to_error(rejection: JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::BadRequest(format!(
            "body must not be larger than {} bytes",
            MAX_BODY_BYTES
        ));
    }
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::BadRequest("body must be sent as application/json".to_string())
        }
        other => ApiError::BadRequest(other.body_text()),
    }
}

/// String query parameter, or `default` when absent
pub fn read_string(qs: &HashMap<String, String>, key: &str, default: &str) -> String {
    match qs.get(key) {
        Some(value) if !value.is_empty() => value.clone(),
        _ => default.to_string(),
    }
}

/// Comma separated query parameter; absent or empty gives an empty list
pub fn read_csv(qs: &HashMap<String, String>, key: &str) -> Vec<String> {
    match qs.get(key) {
        Some(value) if !value.is_empty() => value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Integer query parameter. A non-integer records a field error and yields `default`.
pub fn read_int(qs: &HashMap<String, String>, key: &str, default: i64, v: &mut Validator) -> i64 {
    match qs.get(key) {
        Some(value) if !value.is_empty() => match value.parse() {
            Ok(n) => n,
            Err(_) => {
                v.add_error(key, "must be an integer value");
                default
            }
        },
        _ => default,
    }
}

/// Positive record id from a path segment; anything else is not found
pub fn parse_id(raw: &str) -> ApiResult<i64> {
    match raw.parse::<i64>() {
        Ok(id) if id >= 1 => Ok(id),
        _ => Err(ApiError::NotFound),
    }
}

/// Optional `X-Expected-Version` precondition
pub fn expected_version(headers: &HeaderMap) -> ApiResult<Option<i64>> {
    match headers.get("x-expected-version") {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| {
                ApiError::BadRequest("X-Expected-Version must be an integer".to_string())
            }),
    }
}
