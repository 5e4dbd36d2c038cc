/// Application context and dependency injection
use crate::{
    background::BackgroundTasks,
    config::ServerConfig,
    db,
    error::ApiResult,
    mailer::{Mailer, Notifier},
    movies::MovieManager,
    permissions::PermissionManager,
    rate_limit::RateLimiter,
    tokens::TokenManager,
    users::UserManager,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub users: Arc<UserManager>,
    pub tokens: Arc<TokenManager>,
    pub permissions: Arc<PermissionManager>,
    pub movies: Arc<MovieManager>,
    pub notifier: Arc<dyn Notifier>,
    pub rate_limiter: Arc<RateLimiter>,
    pub tasks: BackgroundTasks,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        config.validate()?;

        let pool = db::create_pool(
            &config.storage.database_path,
            db::DatabaseOptions {
                max_connections: config.storage.max_connections,
                ..Default::default()
            },
        )
        .await?;

        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;
        tracing::info!(
            path = %config.storage.database_path.display(),
            max_connections = config.storage.max_connections,
            "database ready"
        );

        let mailer = Mailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("Email not configured - notifications will be skipped");
        }

        Ok(Self::with_pool(config, pool, Arc::new(mailer)))
    }

    /// Wire managers around an existing pool
    pub fn with_pool(config: ServerConfig, pool: SqlitePool, notifier: Arc<dyn Notifier>) -> Self {
        let timeout = config.storage.query_timeout;

        Self {
            users: Arc::new(UserManager::new(pool.clone(), timeout)),
            tokens: Arc::new(TokenManager::new(pool.clone(), timeout)),
            permissions: Arc::new(PermissionManager::new(pool.clone(), timeout)),
            movies: Arc::new(MovieManager::new(pool.clone(), timeout)),
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            notifier,
            tasks: BackgroundTasks::new(),
            db: pool,
            config: Arc::new(config),
        }
    }
}

/// Context over an in-memory database with a recording notifier
#[cfg(test)]
pub async fn test_context() -> (AppContext, Arc<crate::mailer::RecordingNotifier>) {
    test_context_with(ServerConfig::for_tests()).await
}

#[cfg(test)]
pub async fn test_context_with(
    config: ServerConfig,
) -> (AppContext, Arc<crate::mailer::RecordingNotifier>) {
    let notifier = Arc::new(crate::mailer::RecordingNotifier::default());
    let ctx = AppContext::with_pool(config, db::test_pool().await, notifier.clone());
    (ctx, notifier)
}
