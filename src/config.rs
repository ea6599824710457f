//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_REQUESTS` / `RATE_LIMIT_PERIOD_SECS`: sustained tier (default: 100 per 60s)
//! - `RATE_LIMIT_BURST` / `RATE_LIMIT_BURST_PERIOD_SECS`: burst tier (default: 10 per 1s)
//! - `RATE_LIMIT_USE_REDIS` + `REDIS_URL`: shared counters across processes
//!
//! # Input Validation
//!
//! - `VALIDATION_STRICT_MODE`: reject injection findings instead of logging them.
//!   Defaults to `true` only when `APP_ENV=production`.

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::identity::IdentityConfig;
use crate::limiter::{RateLimitConfig, TierLimit};
use crate::middleware::admission::{
    AdmissionConfig, DEFAULT_RATE_LIMIT_SKIP_PATHS, DEFAULT_VALIDATION_SKIP_PATHS,
};
use crate::validation::ValidationConfig;

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Deployment environment name (default: "development")
    pub app_env: String,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    pub rate_limit_enabled: bool,

    /// Requests allowed per sustained window (default: 100)
    pub rate_limit_requests: u64,

    /// Sustained window length (default: 60s)
    pub rate_limit_period_secs: u64,

    /// Requests allowed per burst window (default: 10)
    pub rate_limit_burst: u64,

    /// Burst window length (default: 1s)
    pub rate_limit_burst_period_secs: u64,

    pub rate_limit_by_ip: bool,
    pub rate_limit_by_user: bool,

    /// Off by default: literal paths give every resource its own window
    pub rate_limit_by_endpoint: bool,

    /// Exact-match paths that never consume quota
    pub rate_limit_skip_paths: Vec<String>,

    // =========================================================================
    // Counter Store Configuration
    // =========================================================================
    /// Keep counters in Redis (falls back to memory while Redis is unreachable)
    pub use_redis: bool,

    /// Default: "redis://127.0.0.1:6379/0"
    pub redis_url: String,

    /// Prefix for every counter key (default: "rate_limit:")
    pub rate_limit_key_prefix: String,

    /// Upper bound on a single Redis call before falling back (default: 250ms)
    pub store_timeout: Duration,

    /// Interval between sweeps of idle in-memory windows (default: 60s)
    pub sweep_interval: Duration,

    // =========================================================================
    // Validation Configuration
    // =========================================================================
    pub validation_enabled: bool,

    /// Reject suspicious headers, queries, path params and JSON keys
    pub validation_strict_mode: bool,

    /// Path prefixes the validation gate ignores
    pub validation_skip_paths: Vec<String>,

    pub max_header_bytes: usize,
    pub max_query_bytes: usize,

    /// Maximum request body size in bytes (default: 10MB)
    pub max_body_bytes: usize,

    pub max_json_depth: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter (e.g., "info", "kb_gate=debug")
    pub log_level: String,

    /// "pretty" (default) or "json"
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let is_production = app_env.eq_ignore_ascii_case("production");

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            app_env,

            // Rate limiting
            rate_limit_enabled: Self::parse_bool_env("RATE_LIMIT_ENABLED", true)?,
            rate_limit_requests: Self::parse_env("RATE_LIMIT_REQUESTS", 100)?,
            rate_limit_period_secs: Self::parse_env("RATE_LIMIT_PERIOD_SECS", 60)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 10)?,
            rate_limit_burst_period_secs: Self::parse_env("RATE_LIMIT_BURST_PERIOD_SECS", 1)?,
            rate_limit_by_ip: Self::parse_bool_env("RATE_LIMIT_BY_IP", true)?,
            rate_limit_by_user: Self::parse_bool_env("RATE_LIMIT_BY_USER", true)?,
            rate_limit_by_endpoint: Self::parse_bool_env("RATE_LIMIT_BY_ENDPOINT", false)?,
            rate_limit_skip_paths: Self::parse_paths(
                "RATE_LIMIT_SKIP_PATHS",
                DEFAULT_RATE_LIMIT_SKIP_PATHS,
            ),

            // Counter store
            use_redis: Self::parse_bool_env("RATE_LIMIT_USE_REDIS", true)?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string()),
            rate_limit_key_prefix: env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "rate_limit:".to_string()),
            store_timeout: Duration::from_millis(Self::parse_env("STORE_TIMEOUT_MS", 250)?),
            sweep_interval: Duration::from_secs(Self::parse_env("SWEEP_INTERVAL_SECS", 60)?),

            // Validation
            validation_enabled: Self::parse_bool_env("VALIDATION_ENABLED", true)?,
            validation_strict_mode: Self::parse_bool_env("VALIDATION_STRICT_MODE", is_production)?,
            validation_skip_paths: Self::parse_paths(
                "VALIDATION_SKIP_PATHS",
                DEFAULT_VALIDATION_SKIP_PATHS,
            ),
            max_header_bytes: Self::parse_env("MAX_HEADER_BYTES", 8_000)?,
            max_query_bytes: Self::parse_env("MAX_QUERY_BYTES", 2_000)?,
            max_body_bytes: Self::parse_env("MAX_BODY_BYTES", 10 * 1024 * 1024)?, // 10MB
            max_json_depth: Self::parse_env("MAX_JSON_DEPTH", 10)?,

            // Security
            cors_allowed_origins: Self::parse_cors_origins(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env_with("LOG_FORMAT", LogFormat::Pretty)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        let positive = [
            ("RATE_LIMIT_REQUESTS", self.rate_limit_requests),
            ("RATE_LIMIT_PERIOD_SECS", self.rate_limit_period_secs),
            ("RATE_LIMIT_BURST", self.rate_limit_burst),
            ("RATE_LIMIT_BURST_PERIOD_SECS", self.rate_limit_burst_period_secs),
            ("MAX_HEADER_BYTES", self.max_header_bytes as u64),
            ("MAX_QUERY_BYTES", self.max_query_bytes as u64),
            ("MAX_BODY_BYTES", self.max_body_bytes as u64),
            ("MAX_JSON_DEPTH", self.max_json_depth as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AppError::ConfigError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        // The burst tier is the short one
        if self.rate_limit_burst_period_secs > self.rate_limit_period_secs {
            return Err(AppError::ConfigError(format!(
                "RATE_LIMIT_BURST_PERIOD_SECS ({}) must be <= RATE_LIMIT_PERIOD_SECS ({})",
                self.rate_limit_burst_period_secs, self.rate_limit_period_secs
            )));
        }

        if self.store_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "STORE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Tier limits and store timeout for the rate limiter.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            sustained: TierLimit {
                limit: self.rate_limit_requests,
                window_secs: self.rate_limit_period_secs,
            },
            burst: TierLimit {
                limit: self.rate_limit_burst,
                window_secs: self.rate_limit_burst_period_secs,
            },
            store_timeout: self.store_timeout,
        }
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            strict_mode: self.validation_strict_mode,
            max_header_bytes: self.max_header_bytes,
            max_query_bytes: self.max_query_bytes,
            max_body_bytes: self.max_body_bytes,
            max_json_depth: self.max_json_depth,
        }
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            rate_limit_enabled: self.rate_limit_enabled,
            validation_enabled: self.validation_enabled,
            identity: IdentityConfig {
                by_ip: self.rate_limit_by_ip,
                by_user: self.rate_limit_by_user,
                by_endpoint: self.rate_limit_by_endpoint,
            },
            rate_limit_skip_paths: self.rate_limit_skip_paths.clone(),
            validation_skip_paths: self.validation_skip_paths.clone(),
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr + ToString,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Like [`parse_env`](Self::parse_env) for types without `ToString`.
    fn parse_env_with<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a boolean flag, accepting true/false, 1/0, yes/no and on/off.
    fn parse_bool_env(name: &str, default: bool) -> AppResult<bool> {
        match env::var(name) {
            Ok(val) => parse_bool(&val)
                .ok_or_else(|| AppError::ConfigError(format!("Invalid {name}: '{val}'"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated path list. Entries not starting with `/` are dropped.
    fn parse_paths(name: &str, default: &[&str]) -> Vec<String> {
        match env::var(name) {
            Ok(val) => split_paths(&val),
            Err(_) => default.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_paths(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| s.starts_with('/'))
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8000,
            app_env: "development".to_string(),
            // Rate limiting
            rate_limit_enabled: true,
            rate_limit_requests: 100,
            rate_limit_period_secs: 60,
            rate_limit_burst: 10,
            rate_limit_burst_period_secs: 1,
            rate_limit_by_ip: true,
            rate_limit_by_user: true,
            rate_limit_by_endpoint: false,
            rate_limit_skip_paths: DEFAULT_RATE_LIMIT_SKIP_PATHS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            // Counter store; memory-only so tests need no Redis
            use_redis: false,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            rate_limit_key_prefix: "rate_limit:".to_string(),
            store_timeout: Duration::from_millis(250),
            sweep_interval: Duration::from_secs(60),
            // Validation
            validation_enabled: true,
            validation_strict_mode: false,
            validation_skip_paths: DEFAULT_VALIDATION_SKIP_PATHS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            max_header_bytes: 8_000,
            max_query_bytes: 2_000,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            max_json_depth: 10,
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}
