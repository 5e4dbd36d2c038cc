/// User persistence
use crate::{
    db::{self, versioning::apply_conditional_write},
    error::{ApiError, ApiResult},
    permissions::PermissionManager,
    users::{Password, User},
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;

/// Credential store
pub struct UserManager {
    db: SqlitePool,
    query_timeout: Duration,
}

/// Build a [`User`] from a row selecting the `users` columns
pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password: Password::from_hash(row.try_get("password_hash")?),
        activated: row.try_get("activated")?,
        version: row.try_get("version")?,
    })
}

fn map_duplicate_email(err: sqlx::Error) -> ApiError {
    if db::is_unique_violation(&err) {
        ApiError::DuplicateEmail
    } else {
        ApiError::Database(err)
    }
}

impl UserManager {
    pub fn new(db: SqlitePool, query_timeout: Duration) -> Self {
        Self { db, query_timeout }
    }

    /// Insert `user` and grant it `grants` atomically.
    ///
    /// On success the user's id, creation time and version are filled in.
    /// A duplicate email rolls back both the insert and the grants.
    pub async fn register<C: AsRef<str>>(&self, user: &mut User, grants: &[C]) -> ApiResult<()> {
        let password_hash = user.password.hash()?.to_string();

        let (id, version) = db::timed(self.query_timeout, "register user", async {
            let mut tx = self.db.begin().await?;

            let row = sqlx::query(
                "INSERT INTO users (created_at, name, email, password_hash, activated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id, version",
            )
            .bind(user.created_at)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&password_hash)
            .bind(user.activated)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_duplicate_email)?;

            let id: i64 = row.try_get("id")?;
            let version: i64 = row.try_get("version")?;

            PermissionManager::grant_with(&mut *tx, id, grants).await?;

            tx.commit().await?;
            Ok::<_, ApiError>((id, version))
        })
        .await?;

        user.id = id;
        user.version = version;

        tracing::info!(user_id = id, "registered user");
        Ok(())
    }

    /// Look up a user by email (case-insensitive)
    pub async fn get_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let row = db::timed(
            self.query_timeout,
            "get user by email",
            sqlx::query(
                "SELECT id, created_at, name, email, password_hash, activated, version
                 FROM users WHERE email = ?1",
            )
            .bind(email)
            .fetch_optional(&self.db),
        )
        .await?;

        row.as_ref().map(user_from_row).transpose().map_err(Into::into)
    }

    pub async fn get_by_id(&self, id: i64) -> ApiResult<Option<User>> {
        let row = db::timed(
            self.query_timeout,
            "get user by id",
            sqlx::query(
                "SELECT id, created_at, name, email, password_hash, activated, version
                 FROM users WHERE id = ?1",
            )
            .bind(id)
            .fetch_optional(&self.db),
        )
        .await?;

        row.as_ref().map(user_from_row).transpose().map_err(Into::into)
    }

    /// Conditional write of every mutable column.
    ///
    /// Succeeds only if the stored version still equals `user.version`; the
    /// new version is written back into `user`.
    pub async fn update(&self, user: &mut User) -> ApiResult<()> {
        let password_hash = user.password.hash()?.to_string();

        let returned: Option<i64> = db::timed(self.query_timeout, "update user", async {
            sqlx::query_scalar(
                "UPDATE users
                 SET name = ?1, email = ?2, password_hash = ?3, activated = ?4,
                     version = version + 1
                 WHERE id = ?5 AND version = ?6
                 RETURNING version",
            )
            .bind(&user.name)
            .bind(&user.email)
            .bind(&password_hash)
            .bind(user.activated)
            .bind(user.id)
            .bind(user.version)
            .fetch_optional(&self.db)
            .await
            .map_err(map_duplicate_email)
        })
        .await?;

        apply_conditional_write(user, returned)
    }
}
