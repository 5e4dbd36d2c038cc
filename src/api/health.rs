/// Health and metrics endpoints
///
/// - `/api/v1/health`: service status, environment and version
/// - `/health/live`: the process answers
/// - `/health/ready`: the database answers within the query timeout
/// - `/metrics`: Prometheus text exposition
use crate::{context::AppContext, db, error::ApiResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub status: &'static str,
    pub environment: String,
    pub version: String,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/v1/health", get(healthcheck))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
}

pub async fn healthcheck(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": SystemInfo {
            status: "available",
            environment: ctx.config.service.environment.clone(),
            version: ctx.config.service.version.clone(),
        }
    }))
}

pub async fn liveness_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Returns 503 when the database does not answer
pub async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> (StatusCode, Json<serde_json::Value>) {
    let start = Instant::now();

    match check_database(&ctx).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": {
                    "response_time_ms": start.elapsed().as_millis() as u64,
                    "pool_size": ctx.db.size(),
                },
                "background_tasks": ctx.tasks.len(),
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed: database check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
        }
    }
}

async fn check_database(ctx: &AppContext) -> ApiResult<()> {
    db::timed(
        ctx.config.storage.query_timeout,
        "readiness check",
        sqlx::query("SELECT 1").fetch_one(&ctx.db),
    )
    .await?;
    Ok(())
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
