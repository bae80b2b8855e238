//! Configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Minimum length of `JWT_SECRET` in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Application configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL. When None, records live in memory.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Redis connection URL. When None, caching is disabled.
    pub redis_url: Option<String>,

    /// HS256 signing secret for session and dispatch tokens.
    pub jwt_secret: String,

    /// Public site URL; job dispatches are posted here.
    pub site_url: String,

    /// Language used when a query or input names none (default: en).
    pub default_language: String,

    /// Accepted language codes. Always contains the default language.
    pub languages: Vec<String>,

    /// Lifetime of session tokens (default: 14 days).
    pub session_token_lifetime: Duration,

    /// Lifetime of job dispatch tokens (default: 60 seconds).
    pub job_token_lifetime: Duration,

    /// Most jobs one drain processes before returning (default: 1000).
    pub job_drain_limit: usize,

    /// How often expired session tokens are removed (default: 1 hour).
    pub token_sweep_interval: Duration,

    /// Run column drops during migration (default: false).
    pub allow_destructive_migrations: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(&var("PORT"), "PORT", defaults.port)?;

        let database_url = var("DATABASE_URL");
        let database_max_connections = parse_or(
            &var("DATABASE_MAX_CONNECTIONS"),
            "DATABASE_MAX_CONNECTIONS",
            defaults.database_max_connections,
        )?;
        let redis_url = var("REDIS_URL");

        let jwt_secret = var("JWT_SECRET").context("JWT_SECRET environment variable is required")?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes");
        }

        let site_url = var("SITE_URL").unwrap_or_else(|| format!("http://localhost:{port}"));

        let default_language = var("DEFAULT_LANGUAGE")
            .map(|v| v.trim().to_lowercase())
            .unwrap_or(defaults.default_language);
        let mut languages: Vec<String> = var("LANGUAGES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if !languages.contains(&default_language) {
            languages.insert(0, default_language.clone());
        }

        let session_token_lifetime = secs_or(
            &var("SESSION_TOKEN_LIFETIME_SECS"),
            "SESSION_TOKEN_LIFETIME_SECS",
            defaults.session_token_lifetime,
        )?;
        let job_token_lifetime = secs_or(
            &var("JOB_TOKEN_LIFETIME_SECS"),
            "JOB_TOKEN_LIFETIME_SECS",
            defaults.job_token_lifetime,
        )?;
        let job_drain_limit = parse_or(
            &var("JOB_DRAIN_LIMIT"),
            "JOB_DRAIN_LIMIT",
            defaults.job_drain_limit,
        )?;
        let token_sweep_interval = secs_or(
            &var("TOKEN_SWEEP_INTERVAL_SECS"),
            "TOKEN_SWEEP_INTERVAL_SECS",
            defaults.token_sweep_interval,
        )?;

        let allow_destructive_migrations = var("ALLOW_DESTRUCTIVE_MIGRATIONS")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            redis_url,
            jwt_secret,
            site_url,
            default_language,
            languages,
            session_token_lifetime,
            job_token_lifetime,
            job_drain_limit,
            token_sweep_interval,
            allow_destructive_migrations,
        })
    }

    /// Whether `code` is an accepted language.
    pub fn is_language(&self, code: &str) -> bool {
        self.languages.iter().any(|l| l == code)
    }
}

fn parse_or<T>(value: &Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}

fn secs_or(value: &Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match value {
        Some(_) => parse_or::<u64>(value, key, 0).map(Duration::from_secs),
        None => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            jwt_secret: "vellum-development-secret-change-me!".to_string(),
            site_url: "http://localhost:3000".to_string(),
            default_language: "en".to_string(),
            languages: vec!["en".to_string()],
            session_token_lifetime: Duration::from_secs(14 * 24 * 60 * 60),
            job_token_lifetime: Duration::from_secs(60),
            job_drain_limit: 1000,
            token_sweep_interval: Duration::from_secs(60 * 60),
            allow_destructive_migrations: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database", &self.database_url.is_some())
            .field("database_max_connections", &self.database_max_connections)
            .field("redis", &self.redis_url.is_some())
            .field("site_url", &self.site_url)
            .field("default_language", &self.default_language)
            .field("languages", &self.languages)
            .field("session_token_lifetime", &self.session_token_lifetime)
            .field("job_token_lifetime", &self.job_token_lifetime)
            .field("job_drain_limit", &self.job_drain_limit)
            .field("token_sweep_interval", &self.token_sweep_interval)
            .field(
                "allow_destructive_migrations",
                &self.allow_destructive_migrations,
            )
            .finish_non_exhaustive()
    }
}
