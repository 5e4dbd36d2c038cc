//! Password hashing via bcrypt.

use crate::error::{ApiError, ApiResult};
use std::fmt;

/// bcrypt cost factor.
#[cfg(not(test))]
pub const BCRYPT_COST: u32 = 12;
#[cfg(test)]
pub const BCRYPT_COST: u32 = 4;

/// A user's password: the stored verifier plus, transiently, the plaintext
/// it was built from. The plaintext only exists between request decoding
/// and validation and is never persisted or logged.
#[derive(Clone, Default)]
pub struct Password {
    plaintext: Option<String>,
    hash: Option<String>,
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "[redacted]"))
            .field("hash", &self.hash.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl Password {
    /// Hash `plaintext` on the blocking pool.
    pub async fn from_plaintext(plaintext: &str) -> ApiResult<Self> {
        let secret = plaintext.to_string();
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(secret, BCRYPT_COST))
            .await
            .map_err(|e| ApiError::Internal(format!("bcrypt task: {e}")))?
            .map_err(|e| ApiError::Internal(format!("bcrypt hash: {e}")))?;

        Ok(Self {
            plaintext: Some(plaintext.to_string()),
            hash: Some(hash),
        })
    }

    /// Wrap a verifier loaded from storage.
    pub fn from_hash(hash: String) -> Self {
        Self {
            plaintext: None,
            hash: Some(hash),
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    /// The stored verifier. A user without one is a programming error.
    pub fn hash(&self) -> ApiResult<&str> {
        self.hash
            .as_deref()
            .ok_or_else(|| ApiError::Invariant("missing password hash for user".to_string()))
    }

    /// Compare `candidate` against the stored verifier in constant time.
    ///
    /// A mismatch is `Ok(false)`; only a malformed verifier is an error.
    pub async fn matches(&self, candidate: &str) -> ApiResult<bool> {
        let hash = self.hash()?.to_string();
        let candidate = candidate.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
            .await
            .map_err(|e| ApiError::Internal(format!("bcrypt task: {e}")))?
            .map_err(|e| ApiError::Internal(format!("bcrypt verify: {e}")))
    }
}
