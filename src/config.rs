/// Configuration management for Blackbox
use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Longest lifetime accepted for any token scope
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub tokens: TokenConfig,
    pub email: Option<EmailConfig>,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// development, staging or production
    pub environment: String,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
    /// Upper bound on every individual storage call
    pub query_timeout: Duration,
}

/// Token lifetimes per scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub activation_ttl: Duration,
    pub authentication_ttl: Duration,
    pub password_reset_ttl: Duration,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst: u32,
}

/// Cross-origin configuration; empty means any origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub trusted_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long in-flight requests get to finish after a shutdown signal
    pub grace_period: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ApiError::Internal(format!("Unknown log format: {}", other))),
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn env_or<T: FromStr>(key: &str, default: T) -> ApiResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ApiError::Internal(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> ApiResult<Duration> {
    env_or(key, default).map(Duration::from_secs)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ApiResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("BLACKBOX_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("BLACKBOX_PORT", 8080u16)?;
        let environment =
            env::var("BLACKBOX_ENV").unwrap_or_else(|_| "development".to_string());
        let version = env::var("BLACKBOX_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let database_path: PathBuf = env::var("BLACKBOX_DATABASE_PATH")
            .unwrap_or_else(|_| "./data/blackbox.sqlite".to_string())
            .into();
        let max_connections = env_or("BLACKBOX_DB_MAX_CONNECTIONS", 25u32)?;
        let query_timeout = env_secs("BLACKBOX_DB_QUERY_TIMEOUT_SECS", 10)?;

        let activation_ttl = env_secs("BLACKBOX_ACTIVATION_TOKEN_TTL_SECS", 3 * 24 * 60 * 60)?;
        let authentication_ttl = env_secs("BLACKBOX_AUTH_TOKEN_TTL_SECS", 24 * 60 * 60)?;
        let password_reset_ttl = env_secs("BLACKBOX_PASSWORD_RESET_TOKEN_TTL_SECS", 45 * 60)?;

        let email = if let Ok(smtp_url) = env::var("BLACKBOX_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("BLACKBOX_SMTP_SENDER")
                    .unwrap_or_else(|_| "Blackbox <no-reply@blackbox.local>".to_string()),
            })
        } else {
            None
        };

        let rate_limit = RateLimitConfig {
            enabled: env_or("BLACKBOX_LIMITER_ENABLED", true)?,
            requests_per_second: env_or("BLACKBOX_LIMITER_RPS", 2u32)?,
            burst: env_or("BLACKBOX_LIMITER_BURST", 4u32)?,
        };

        let trusted_origins = env::var("BLACKBOX_CORS_TRUSTED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let grace_period = env_secs("BLACKBOX_SHUTDOWN_GRACE_SECS", 5)?;

        let level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "blackbox=info,tower_http=info".to_string());
        let format = env_or("BLACKBOX_LOG_FORMAT", LogFormat::Pretty)?;

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                environment,
                version,
            },
            storage: StorageConfig {
                database_path,
                max_connections,
                query_timeout,
            },
            tokens: TokenConfig {
                activation_ttl,
                authentication_ttl,
                password_reset_ttl,
            },
            email,
            rate_limit,
            cors: CorsConfig { trusted_origins },
            shutdown: ShutdownConfig { grace_period },
            logging: LoggingConfig { level, format },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ApiError::Internal("Hostname cannot be empty".to_string()));
        }
        if self.service.port == 0 {
            return Err(ApiError::Internal("Port must be non-zero".to_string()));
        }
        if self.storage.max_connections == 0 {
            return Err(ApiError::Internal(
                "Database pool needs at least one connection".to_string(),
            ));
        }
        if self.storage.query_timeout.is_zero() {
            return Err(ApiError::Internal("Query timeout must be non-zero".to_string()));
        }
        let lifetimes = [
            self.tokens.activation_ttl,
            self.tokens.authentication_ttl,
            self.tokens.password_reset_ttl,
        ];
        if lifetimes.iter().any(|ttl| ttl.is_zero()) {
            return Err(ApiError::Internal("Token lifetimes must be positive".to_string()));
        }
        if lifetimes.iter().any(|ttl| *ttl > MAX_TOKEN_TTL) {
            return Err(ApiError::Internal(format!(
                "Token lifetimes must not exceed {} days",
                MAX_TOKEN_TTL.as_secs() / 86_400
            )));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.requests_per_second == 0 || self.rate_limit.burst == 0)
        {
            return Err(ApiError::Internal(
                "Rate limiter needs a positive rate and burst".to_string(),
            ));
        }

        Ok(())
    }

    /// Listen address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.hostname, self.service.port)
    }

    /// In-memory configuration for tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 8080,
                environment: "test".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                database_path: PathBuf::from(":memory:"),
                max_connections: 1,
                query_timeout: Duration::from_secs(10),
            },
            tokens: TokenConfig {
                activation_ttl: Duration::from_secs(3 * 24 * 60 * 60),
                authentication_ttl: Duration::from_secs(24 * 60 * 60),
                password_reset_ttl: Duration::from_secs(45 * 60),
            },
            email: None,
            rate_limit: RateLimitConfig {
                enabled: false,
                requests_per_second: 2,
                burst: 4,
            },
            cors: CorsConfig {
                trusted_origins: Vec::new(),
            },
            shutdown: ShutdownConfig {
                grace_period: Duration::from_secs(5),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
