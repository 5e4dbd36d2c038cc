/// Authentication, authorization and request metrics middleware
use crate::{
    auth::{self, Identity},
    context::AppContext,
    error::{ApiError, ApiResult},
    metrics,
    permissions::Permission,
    tokens::TokenScope,
};
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Extract bearer token from Authorization header.
///
/// `Ok(None)` when the header is absent. A header that is present but not
/// exactly `Bearer <token>` is an invalid token.
pub fn extract_bearer_token(headers: &HeaderMap) -> ApiResult<Option<String>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| ApiError::InvalidAuthenticationToken)?;
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(Some(token.to_string())),
        _ => Err(ApiError::InvalidAuthenticationToken),
    }
}

/// Resolve the caller and store an [`Identity`] in the request extensions
pub async fn authenticate(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = match extract_bearer_token(req.headers())? {
        None => Identity::Anonymous,
        Some(token) => match ctx.tokens.resolve(&token, TokenScope::Authentication).await? {
            Some(user) => Identity::User(user),
            None => return Err(ApiError::InvalidAuthenticationToken),
        },
    };

    req.extensions_mut().insert(identity);

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    Ok(response)
}

/// State for [`require_permission`]: the context plus the code a route needs
#[derive(Clone)]
pub struct PermissionGate {
    pub ctx: AppContext,
    pub permission: Permission,
}

impl PermissionGate {
    pub fn new(ctx: AppContext, permission: Permission) -> Self {
        Self { ctx, permission }
    }
}

/// Reject the request unless the caller holds the gate's permission
pub async fn require_permission(
    State(gate): State<PermissionGate>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| ApiError::Invariant("permission gate ran before authentication".to_string()))?;

    auth::authorize(&gate.ctx.permissions, &identity, gate.permission).await?;

    Ok(next.run(req).await)
}

/// Count and time every request by matched route
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    metrics::HTTP_REQUESTS_ACTIVE.inc();
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::HTTP_REQUESTS_ACTIVE.dec();

    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
