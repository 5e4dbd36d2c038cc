/// Metrics and telemetry for Blackbox
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Token issuance and authorization failures
/// - Edit conflicts on versioned records
/// - Background tasks, scheduled jobs and outgoing email

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder,
    HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Active HTTP requests
    pub static ref HTTP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "http_requests_active",
        "Number of HTTP requests currently being processed"
    )
    .unwrap();

    // ========== Auth Metrics ==========

    pub static ref TOKENS_ISSUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tokens_issued_total",
        "Total number of tokens issued by scope",
        &["scope"]
    )
    .unwrap();

    pub static ref AUTHORIZATION_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "authorization_failures_total",
        "Requests rejected by the permission gate",
        &["reason"]
    )
    .unwrap();

    // ========== Storage Metrics ==========

    pub static ref EDIT_CONFLICTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "edit_conflicts_total",
        "Conditional writes rejected because the version changed",
        &["entity"]
    )
    .unwrap();

    // ========== Background Work Metrics ==========

    pub static ref BACKGROUND_TASKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_tasks_total",
        "Detached tasks by name and outcome",
        &["task", "outcome"]
    )
    .unwrap();

    pub static ref BACKGROUND_TASKS_ACTIVE: IntGauge = register_int_gauge!(
        "background_tasks_active",
        "Detached tasks still running"
    )
    .unwrap();

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();

    pub static ref EMAILS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "emails_total",
        "Outgoing email by template and outcome",
        &["template", "outcome"]
    )
    .unwrap();
}

/// Render all metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

pub fn record_token_issued(scope: &str) {
    TOKENS_ISSUED_TOTAL.with_label_values(&[scope]).inc();
}

pub fn record_authorization_failure(reason: &str) {
    AUTHORIZATION_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_edit_conflict(entity: &str) {
    EDIT_CONFLICTS_TOTAL.with_label_values(&[entity]).inc();
}

pub fn record_background_task(task: &str, outcome: &str) {
    BACKGROUND_TASKS_TOTAL.with_label_values(&[task, outcome]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

pub fn record_email(template: &str, outcome: &str) {
    EMAILS_TOTAL.with_label_values(&[template, outcome]).inc();
}
