/// Scoped bearer tokens
///
/// A token is 16 random bytes rendered as 26 characters of unpadded
/// base-32. Only the SHA-256 digest of the plaintext is stored; the
/// plaintext is handed to the caller once and cannot be recovered.
use crate::{
    db,
    error::{ApiError, ApiResult},
    metrics,
    users::{manager::user_from_row, User},
    validation::Validator,
};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::fmt;
use std::time::Duration;

/// Length of the plaintext form
pub const TOKEN_LENGTH: usize = 26;

/// What a token may be used for. Tokens never validate outside their scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenScope {
    #[serde(rename = "activation")]
    Activation,
    #[serde(rename = "authentication")]
    Authentication,
    #[serde(rename = "password-reset")]
    PasswordReset,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
            TokenScope::Authentication => "authentication",
            TokenScope::PasswordReset => "password-reset",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issued token. Serializes as `{ "token": <plaintext>, "expiry": <time> }`.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: Vec<u8>,
    #[serde(skip)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: TokenScope,
}

/// Credentials exchanged for an authentication token
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthenticationTokenRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request for a password-reset token
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetTokenRequest {
    #[serde(default)]
    pub email: String,
}

pub fn hash_plaintext(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// Build a fresh token. Entropy failure is an error, never a weaker fallback.
pub fn generate(user_id: i64, ttl: Duration, scope: TokenScope) -> ApiResult<Token> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| ApiError::Internal(format!("token entropy: {e}")))?;

    let plaintext = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &bytes);
    let expiry = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| ApiError::Internal(format!("token ttl out of range: {:?}", ttl)))?;

    Ok(Token {
        hash: hash_plaintext(&plaintext),
        plaintext,
        user_id,
        expiry,
        scope,
    })
}

pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(
        plaintext.len() == TOKEN_LENGTH,
        "token",
        "must be 26 bytes long",
    );
}

fn is_well_formed(plaintext: &str) -> bool {
    plaintext.len() == TOKEN_LENGTH
}

/// Token storage
pub struct TokenManager {
    db: SqlitePool,
    query_timeout: Duration,
}

impl TokenManager {
    pub fn new(db: SqlitePool, query_timeout: Duration) -> Self {
        Self { db, query_timeout }
    }

    /// Generate, persist and return a token for `user_id`
    pub async fn issue(&self, user_id: i64, ttl: Duration, scope: TokenScope) -> ApiResult<Token> {
        let token = generate(user_id, ttl, scope)?;
        self.insert(&token).await?;

        metrics::record_token_issued(scope.as_str());
        tracing::debug!(user_id, scope = %scope, "issued token");
        Ok(token)
    }

    async fn insert(&self, token: &Token) -> ApiResult<()> {
        db::timed(
            self.query_timeout,
            "insert token",
            sqlx::query("INSERT INTO tokens (hash, user_id, expiry, scope) VALUES (?1, ?2, ?3, ?4)")
                .bind(&token.hash)
                .bind(token.user_id)
                .bind(token.expiry)
                .bind(token.scope.as_str())
                .execute(&self.db),
        )
        .await?;
        Ok(())
    }

    /// Owner of a live token in `scope`.
    ///
    /// Unknown, expired, wrong-scope and malformed tokens are all `None`;
    /// callers cannot tell them apart.
    pub async fn resolve(&self, plaintext: &str, scope: TokenScope) -> ApiResult<Option<User>> {
        if !is_well_formed(plaintext) {
            return Ok(None);
        }

        let row = db::timed(
            self.query_timeout,
            "resolve token",
            sqlx::query(
                "SELECT u.id, u.created_at, u.name, u.email, u.password_hash, u.activated, u.version
                 FROM users u
                 INNER JOIN tokens t ON t.user_id = u.id
                 WHERE t.hash = ?1 AND t.scope = ?2 AND t.expiry > ?3",
            )
            .bind(hash_plaintext(plaintext))
            .bind(scope.as_str())
            .bind(Utc::now())
            .fetch_optional(&self.db),
        )
        .await?;

        row.as_ref().map(user_from_row).transpose().map_err(Into::into)
    }

    /// Delete every `scope` token belonging to `user_id`
    pub async fn revoke_all_for_user(&self, scope: TokenScope, user_id: i64) -> ApiResult<u64> {
        let result = db::timed(
            self.query_timeout,
            "revoke tokens",
            sqlx::query("DELETE FROM tokens WHERE scope = ?1 AND user_id = ?2")
                .bind(scope.as_str())
                .bind(user_id)
                .execute(&self.db),
        )
        .await?;

        Ok(result.rows_affected())
    }

    /// Remove tokens whose expiry has passed
    pub async fn cleanup_expired(&self) -> ApiResult<u64> {
        let result = db::timed(
            self.query_timeout,
            "cleanup expired tokens",
            sqlx::query("DELETE FROM tokens WHERE expiry <= ?1")
                .bind(Utc::now())
                .execute(&self.db),
        )
        .await?;

        Ok(result.rows_affected())
    }
}
