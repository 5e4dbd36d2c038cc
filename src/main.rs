/// Blackbox - movie catalog JSON API
///
/// Users register, activate their account with an emailed token, and then
/// read and edit a shared catalog of movies under per-user permissions.

mod api;
mod auth;
mod background;
mod config;
mod context;
mod db;
mod error;
mod jobs;
mod mailer;
mod metrics;
mod movies;
mod permissions;
mod rate_limit;
mod server;
mod tokens;
mod users;
mod validation;

use config::{LogFormat, ServerConfig};
use context::AppContext;
use error::ApiResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ApiResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    init_tracing(&config);
    tracing::info!(
        version = %config.service.version,
        environment = %config.service.environment,
        "starting blackbox"
    );

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    let served = server::serve((*ctx).clone()).await;

    scheduler.stop().await;
    ctx.tasks.shutdown().await;
    ctx.db.close().await;

    served?;
    tracing::info!("stopped");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("blackbox=info,tower_http=info"));

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
