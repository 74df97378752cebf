use std::env;
use std::time::Duration;

/// Process-level configuration loaded once at startup from `SJ_`-prefixed
/// environment variables and passed by reference. Teardown closes the pool
/// built from `database_url`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,

    /// Default lease duration granted to a job claim when the caller does
    /// not specify one.
    pub default_lease_seconds: i64,

    pub job_max_attempts: i32,
    pub job_retry_base_seconds: i64,
    pub job_retry_max_seconds: i64,

    pub freshness_check_interval_hours: i64,
    pub freshness_stale_after_hours: i64,
    pub freshness_archive_after_hours: i64,

    // Web server (ingestplane-api only; zero-valued for repo-only binaries)
    pub web_host: String,
    pub web_port: u16,
    pub cors_origins: Vec<String>,

    // Human auth (external identity provider)
    pub identity_provider_url: String,
    pub identity_provider_anon_key: String,
    pub auth_timeout_seconds: u64,
}

impl Config {
    /// Load configuration shared by every binary that talks to Postgres.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("SJ_DATABASE_URL"),
            database_max_connections: env_parse("SJ_DATABASE_MAX_CONNECTIONS", 10),
            default_lease_seconds: env_parse("SJ_DEFAULT_LEASE_SECONDS", 300),
            job_max_attempts: env_parse("SJ_JOB_MAX_ATTEMPTS", 5),
            job_retry_base_seconds: env_parse("SJ_JOB_RETRY_BASE_SECONDS", 30),
            job_retry_max_seconds: env_parse("SJ_JOB_RETRY_MAX_SECONDS", 3600),
            freshness_check_interval_hours: env_parse("SJ_FRESHNESS_CHECK_INTERVAL_HOURS", 24),
            freshness_stale_after_hours: env_parse("SJ_FRESHNESS_STALE_AFTER_HOURS", 24 * 14),
            freshness_archive_after_hours: env_parse("SJ_FRESHNESS_ARCHIVE_AFTER_HOURS", 24 * 60),
            web_host: env::var("SJ_WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env_parse("SJ_WEB_PORT", 8080),
            cors_origins: env::var("SJ_CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            identity_provider_url: env::var("SJ_IDENTITY_PROVIDER_URL").unwrap_or_default(),
            identity_provider_anon_key: env::var("SJ_IDENTITY_PROVIDER_ANON_KEY")
                .unwrap_or_default(),
            auth_timeout_seconds: env_parse("SJ_AUTH_TIMEOUT_SECONDS", 5),
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }

    /// Log the shape (not the value) of configuration for debugging.
    pub fn log_redacted(&self) {
        tracing::info!(
            database_max_connections = self.database_max_connections,
            job_max_attempts = self.job_max_attempts,
            web_port = self.web_port,
            cors_origins = self.cors_origins.len(),
            identity_provider_configured = !self.identity_provider_url.is_empty(),
            "loaded configuration",
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
