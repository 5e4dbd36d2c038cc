/// Background job implementations
use crate::{context::AppContext, db, error::ApiResult};

/// Delete tokens past their expiry
pub async fn cleanup_expired_tokens(ctx: &AppContext) -> ApiResult<u64> {
    ctx.tokens.cleanup_expired().await
}

/// Forget rate limiter buckets that have fully refilled; returns clients still tracked
pub async fn prune_rate_limiter(ctx: &AppContext) -> ApiResult<u64> {
    ctx.rate_limiter.retain_recent();
    Ok(ctx.rate_limiter.tracked_clients() as u64)
}

/// Health check - verify the database answers; returns open connections
pub async fn health_check(ctx: &AppContext) -> ApiResult<u64> {
    db::timed(
        ctx.config.storage.query_timeout,
        "health check",
        sqlx::query("SELECT 1").fetch_one(&ctx.db),
    )
    .await?;

    Ok(ctx.db.size() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::test_context, tokens::TokenScope, users::{Password, User}};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cleanup_expired_tokens() {
        let (ctx, _) = test_context().await;
        let mut user = User::new(
            "Jobs".to_string(),
            "jobs@example.com".to_string(),
            Password::from_plaintext("pa55word").await.unwrap(),
        );
        let grants: [&str; 0] = [];
        ctx.users.register(&mut user, &grants).await.unwrap();

        ctx.tokens
            .issue(user.id, Duration::ZERO, TokenScope::Activation)
            .await
            .unwrap();
        ctx.tokens
            .issue(user.id, Duration::from_secs(60), TokenScope::Activation)
            .await
            .unwrap();

        assert_eq!(cleanup_expired_tokens(&ctx).await.unwrap(), 1);
        assert_eq!(cleanup_expired_tokens(&ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health_check_and_prune() {
        let (ctx, _) = test_context().await;
        assert!(health_check(&ctx).await.unwrap() >= 1);
        assert_eq!(prune_rate_limiter(&ctx).await.unwrap(), 0);
    }
}
