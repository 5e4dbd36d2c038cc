/// Permission registry
///
/// Users hold a set of capability codes. Grants are idempotent and limited
/// to the codes seeded in the `permissions` table; anything else is dropped
/// by the join in [`PermissionManager::grant_with`].
use crate::{db, error::ApiResult};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Capability codes known to the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "movies:read")]
    MoviesRead,
    #[serde(rename = "movies:write")]
    MoviesWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::MoviesRead => "movies:read",
            Permission::MoviesWrite => "movies:write",
        }
    }
}

impl AsRef<str> for Permission {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective permission set of a user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for Permissions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Permissions(iter.into_iter().collect())
    }
}

/// Permission grant storage
pub struct PermissionManager {
    db: SqlitePool,
    query_timeout: Duration,
}

impl PermissionManager {
    pub fn new(db: SqlitePool, query_timeout: Duration) -> Self {
        Self { db, query_timeout }
    }

    /// Codes granted to `user_id`; empty when the user has none
    pub async fn for_user(&self, user_id: i64) -> ApiResult<Permissions> {
        let codes: Vec<String> = db::timed(
            self.query_timeout,
            "permissions for user",
            sqlx::query_scalar(
                "SELECT p.code
                 FROM permissions p
                 INNER JOIN users_permissions up ON up.permission_id = p.id
                 WHERE up.user_id = ?1",
            )
            .bind(user_id)
            .fetch_all(&self.db),
        )
        .await?;

        Ok(codes.into_iter().collect())
    }

    /// Grant `codes` to `user_id`
    pub async fn grant<C: AsRef<str>>(&self, user_id: i64, codes: &[C]) -> ApiResult<()> {
        db::timed(
            self.query_timeout,
            "grant permissions",
            Self::grant_with(&self.db, user_id, codes),
        )
        .await
    }

    /// Grant on an arbitrary executor so registration can share its transaction
    pub async fn grant_with<'e, E, C>(executor: E, user_id: i64, codes: &[C]) -> ApiResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
        C: AsRef<str>,
    {
        if codes.is_empty() {
            return Ok(());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO users_permissions (user_id, permission_id) SELECT ",
        );
        query.push_bind(user_id);
        query.push(", id FROM permissions WHERE code IN (");
        let mut separated = query.separated(", ");
        for code in codes {
            separated.push_bind(code.as_ref().to_string());
        }
        separated.push_unseparated(")");

        query.build().execute(executor).await?;
        Ok(())
    }
}
