/// HTTP server setup and routing
use crate::{
    api::{
        self,
        extract::MAX_BODY_BYTES,
        middleware::{authenticate, track_metrics},
    },
    background::panic_message,
    context::AppContext,
    error::{ApiError, ApiResult, ErrorResponse},
    rate_limit::rate_limit_middleware,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use std::{any::Any, net::SocketAddr};
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .merge(api::routes(&ctx))
        .fallback(not_found)
        .with_state(ctx.clone())
        .layer(middleware::from_fn_with_state(ctx.clone(), authenticate))
        .layer(middleware::from_fn_with_state(ctx.clone(), rate_limit_middleware))
        .layer(middleware::from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&ctx.config.cors.trusted_origins))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

/// Configured origins, or any origin when none are configured
fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = trusted_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-expected-version"),
        ]);

    if origins.is_empty() {
        layer.allow_origin(AnyOrigin)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Panicking handler: JSON 500 and close the connection
fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(panic = %panic_message(payload.as_ref()), "request handler panicked");

    let body = Json(ErrorResponse {
        error: "internal_server_error".to_string(),
        message: "The server encountered a problem and could not process your request"
            .to_string(),
        fields: None,
    });
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// 404 handler
async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Start the HTTP server and run until SIGINT/SIGTERM.
///
/// In-flight requests get the configured grace period to finish; after
/// that the server is dropped.
pub async fn serve(ctx: AppContext) -> ApiResult<()> {
    let addr = ctx.config.bind_address();
    let grace_period = ctx.config.shutdown.grace_period;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    info!(
        addr = %addr,
        environment = %ctx.config.service.environment,
        "blackbox listening"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(listen_for_signals(shutdown.clone()));

    let app = build_router(ctx);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });

    let result = tokio::select! {
        result = &mut server => result,
        _ = shutdown.cancelled() => {
            info!(grace_secs = grace_period.as_secs(), "draining in-flight requests");
            match tokio::time::timeout(grace_period, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("grace period elapsed with requests in flight");
                    server.abort();
                    return Ok(());
                }
            }
        }
    };

    result
        .map_err(|e| ApiError::Internal(format!("Server task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}

async fn listen_for_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ServerConfig,
        context::{test_context, test_context_with},
        mailer::RecordingNotifier,
        permissions::Permission,
        tokens::TokenScope,
        users::{Password, User},
    };
    use axum::body::Body;
    use axum::http::{HeaderMap, Request};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        ctx: AppContext,
        router: Router,
        notifier: Arc<RecordingNotifier>,
    }

    struct TestResponse {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    impl TestApp {
        async fn new() -> Self {
            let (ctx, notifier) = test_context().await;
            Self::from_parts(ctx, notifier)
        }

        fn from_parts(ctx: AppContext, notifier: Arc<RecordingNotifier>) -> Self {
            let router = build_router(ctx.clone());
            Self {
                ctx,
                router,
                notifier,
            }
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> TestResponse {
            self.send_with(method, uri, token, body, &[]).await
        }

        async fn send_with(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
            extra_headers: &[(&str, &str)],
        ) -> TestResponse {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
            for (name, value) in extra_headers {
                builder = builder.header(*name, *value);
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };

            TestResponse {
                status,
                headers,
                body,
            }
        }

        /// Register, activate and log in; returns an authentication token
        async fn activated_user(&self, email: &str) -> String {
            let res = self
                .send(
                    "POST",
                    "/api/v1/users/register",
                    None,
                    Some(json!({ "name": "Test User", "email": email, "password": "pa55word" })),
                )
                .await;
            assert_eq!(res.status, StatusCode::ACCEPTED);

            self.ctx.tasks.drain().await;
            let activation = self.notifier.activation_token_for(email).unwrap();
            let res = self
                .send(
                    "PUT",
                    "/api/v1/users/activate",
                    None,
                    Some(json!({ "token": activation })),
                )
                .await;
            assert_eq!(res.status, StatusCode::OK);

            self.login(email, "pa55word").await
        }

        async fn login(&self, email: &str, password: &str) -> String {
            let res = self
                .send(
                    "POST",
                    "/api/v1/tokens/auth",
                    None,
                    Some(json!({ "email": email, "password": password })),
                )
                .await;
            assert_eq!(res.status, StatusCode::OK, "{}", res.body);
            res.body["token"]["token"].as_str().unwrap().to_string()
        }
    }

    fn casablanca() -> Value {
        json!({
            "title": "Casablanca",
            "year": 1942,
            "runtime": "102 mins",
            "genres": ["drama", "romance"]
        })
    }

    #[tokio::test]
    async fn test_healthcheck_and_unknown_route() {
        let app = TestApp::new().await;

        let res = app.send("GET", "/api/v1/health", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["data"]["status"], "available");
        assert!(res.headers.get(header::VARY).is_some());

        let res = app.send("GET", "/api/v1/nowhere", None, None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_movie_lifecycle() {
        let app = TestApp::new().await;
        let token = app.activated_user("alice@example.com").await;

        let res = app.send("GET", "/api/v1/movies", Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["movies"], json!([]));
        assert_eq!(res.body["metadata"]["total"], 0);
        assert_eq!(res.body["metadata"]["last_page"], 0);

        let res = app
            .send("POST", "/api/v1/movies", Some(&token), Some(casablanca()))
            .await;
        assert_eq!(res.status, StatusCode::CREATED);
        let id = res.body["movie"]["id"].as_i64().unwrap();
        assert_eq!(
            res.headers.get(header::LOCATION).unwrap(),
            format!("/api/v1/movies/{}", id).as_str()
        );
        assert_eq!(res.body["movie"]["runtime"], "102 mins");
        assert_eq!(res.body["movie"]["version"], 1);

        let res = app
            .send("GET", &format!("/api/v1/movies/{}", id), Some(&token), None)
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["movie"]["title"], "Casablanca");

        let res = app
            .send("GET", "/api/v1/movies?title=casa&page_size=5", Some(&token), None)
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["metadata"]["total"], 1);
        assert_eq!(res.body["metadata"]["page_size"], 5);

        let edit = format!("/api/v1/movies/{}/edit", id);
        let res = app
            .send_with(
                "PATCH",
                &edit,
                Some(&token),
                Some(json!({ "year": 1943 })),
                &[("x-expected-version", "7")],
            )
            .await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body["error"], "edit_conflict");

        let res = app
            .send_with(
                "PATCH",
                &edit,
                Some(&token),
                Some(json!({ "year": 1943 })),
                &[("x-expected-version", "1")],
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["movie"]["year"], 1943);
        assert_eq!(res.body["movie"]["title"], "Casablanca");
        assert_eq!(res.body["movie"]["version"], 2);

        let res = app
            .send("DELETE", &format!("/api/v1/movies/{}/delete", id), Some(&token), None)
            .await;
        assert_eq!(res.status, StatusCode::OK);

        let res = app
            .send("GET", &format!("/api/v1/movies/{}", id), Some(&token), None)
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);

        let res = app
            .send("DELETE", "/api/v1/movies/abc/delete", Some(&token), None)
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_authorization_outcomes() {
        let app = TestApp::new().await;

        let res = app.send("GET", "/api/v1/movies", None, None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "authentication_required");

        let res = app
            .send("GET", "/api/v1/movies", Some("ABCDEFGHIJKLMNOPQRSTUVWXYZ"), None)
            .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "invalid_authentication_token");
        assert_eq!(res.headers.get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");

        // Malformed tokens fail even on open routes
        let res = app.send("GET", "/api/v1/health", Some("short"), None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);

        // Registered but not activated
        let res = app
            .send(
                "POST",
                "/api/v1/users/register",
                None,
                Some(json!({ "name": "Bob", "email": "bob@example.com", "password": "pa55word" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::ACCEPTED);
        assert_eq!(res.body["user"]["activated"], false);
        assert!(res.body["user"].get("password").is_none());

        let token = app.login("bob@example.com", "pa55word").await;
        let res = app.send("GET", "/api/v1/movies", Some(&token), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.body["error"], "inactive_account");

        // Activated, read-only
        let mut reader = User::new(
            "Reader".to_string(),
            "reader@example.com".to_string(),
            Password::from_plaintext("pa55word").await.unwrap(),
        );
        reader.activated = true;
        app.ctx
            .users
            .register(&mut reader, &[Permission::MoviesRead])
            .await
            .unwrap();
        let token = app
            .ctx
            .tokens
            .issue(reader.id, Duration::from_secs(60), TokenScope::Authentication)
            .await
            .unwrap()
            .plaintext;

        let res = app.send("GET", "/api/v1/movies", Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        let res = app
            .send("POST", "/api/v1/movies", Some(&token), Some(casablanca()))
            .await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.body["error"], "not_permitted");
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let app = TestApp::new().await;
        app.activated_user("carol@example.com").await;

        let res = app
            .send(
                "POST",
                "/api/v1/users/register",
                None,
                Some(json!({ "name": "Carol", "email": "CAROL@example.com", "password": "pa55word" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(res.body["fields"]["email"].is_string());

        let res = app
            .send(
                "POST",
                "/api/v1/users/register",
                None,
                Some(json!({ "name": "", "email": "nope", "password": "short" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.body["fields"]["name"], "must be provided");
        assert_eq!(res.body["fields"]["email"], "must be a valid email address");
        assert_eq!(res.body["fields"]["password"], "must be at least 8 bytes long");

        let res = app
            .send(
                "POST",
                "/api/v1/users/register",
                None,
                Some(json!({ "name": "X", "email": "x@example.com", "password": "pa55word", "admin": true })),
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = app
            .send(
                "PUT",
                "/api/v1/users/activate",
                None,
                Some(json!({ "token": "ABCDEFGHIJKLMNOPQRSTUVWXYZ" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.body["fields"]["token"], "invalid or expired activation token");
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_indistinguishable() {
        let app = TestApp::new().await;
        app.activated_user("dave@example.com").await;

        for (email, password) in [
            ("dave@example.com", "wrongpass"),
            ("nobody@example.com", "pa55word"),
        ] {
            let res = app
                .send(
                    "POST",
                    "/api/v1/tokens/auth",
                    None,
                    Some(json!({ "email": email, "password": password })),
                )
                .await;
            assert_eq!(res.status, StatusCode::UNAUTHORIZED);
            assert_eq!(res.body["error"], "invalid_credentials");
        }
    }

    #[tokio::test]
    async fn test_movie_input_errors() {
        let app = TestApp::new().await;
        let token = app.activated_user("erin@example.com").await;

        let res = app
            .send(
                "POST",
                "/api/v1/movies",
                Some(&token),
                Some(json!({ "title": "", "year": 1800, "runtime": "0 mins" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.body["fields"]["title"], "must be provided");
        assert_eq!(res.body["fields"]["year"], "must be greater than 1888");
        assert_eq!(res.body["fields"]["genres"], "must be provided");

        let res = app
            .send(
                "POST",
                "/api/v1/movies",
                Some(&token),
                Some(json!({ "title": "X", "year": 2000, "runtime": 90, "genres": ["a"] })),
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = app
            .send("GET", "/api/v1/movies?page=abc&sort=budget", Some(&token), None)
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.body["fields"]["page"], "must be an integer value");
        assert_eq!(res.body["fields"]["sort"], "invalid sort value");
    }

    #[tokio::test]
    async fn test_oversized_body_is_bad_request() {
        let app = TestApp::new().await;

        let res = app
            .send(
                "POST",
                "/api/v1/users/register",
                None,
                Some(json!({
                    "name": "x".repeat(MAX_BODY_BYTES + 1),
                    "email": "huge@example.com",
                    "password": "pa55word"
                })),
            )
            .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "bad_request");
        assert_eq!(
            res.body["message"],
            format!("body must not be larger than {} bytes", MAX_BODY_BYTES)
        );
        assert!(app.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let app = TestApp::new().await;
        app.activated_user("frank@example.com").await;

        let res = app
            .send(
                "POST",
                "/api/v1/tokens/password-reset/request",
                None,
                Some(json!({ "email": "missing@example.com" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.body["fields"]["email"], "no matching email address found");

        let res = app
            .send(
                "POST",
                "/api/v1/tokens/password-reset/request",
                None,
                Some(json!({ "email": "frank@example.com" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::ACCEPTED);

        app.ctx.tasks.drain().await;
        let reset = app.notifier.reset_token_for("frank@example.com").unwrap();

        let res = app
            .send(
                "PUT",
                "/api/v1/tokens/password-reset",
                None,
                Some(json!({ "password": "n3wpa55word", "token": reset })),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);

        // Single use
        let res = app
            .send(
                "PUT",
                "/api/v1/tokens/password-reset",
                None,
                Some(json!({ "password": "an0therpass", "token": reset })),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);

        app.login("frank@example.com", "n3wpa55word").await;
    }

    #[tokio::test]
    async fn test_password_reset_requires_activation() {
        let app = TestApp::new().await;
        app.send(
            "POST",
            "/api/v1/users/register",
            None,
            Some(json!({ "name": "Gina", "email": "gina@example.com", "password": "pa55word" })),
        )
        .await;

        let res = app
            .send(
                "POST",
                "/api/v1/tokens/password-reset/request",
                None,
                Some(json!({ "email": "gina@example.com" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.body["fields"]["email"], "user account must be activated");
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_bursts() {
        let mut config = ServerConfig::for_tests();
        config.rate_limit.enabled = true;
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let (ctx, notifier) = test_context_with(config).await;
        let app = TestApp::from_parts(ctx, notifier);

        let first = app.send("GET", "/health/live", None, None).await;
        assert_eq!(first.status, StatusCode::OK);

        let second = app.send("GET", "/health/live", None, None).await;
        assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers.get(header::RETRY_AFTER).is_some());
    }

    #[test]
    fn test_panic_response_closes_connection() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(header::CONNECTION).unwrap(), "close");
    }
}
