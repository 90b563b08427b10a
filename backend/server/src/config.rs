//! # Configuration
//!
//! Plain values come from environment variables, each with a logged default.
//! Secrets are read from Docker secrets at `/run/secrets/{NAME}` and fall back to an
//! environment variable of the same name.
//!
//! | Key                    | Default                  |
//! |------------------------|--------------------------|
//! | `RUST_PORT`            | 1111                     |
//! | `STORE_BACKEND`        | memory                   |
//! | `REDIS_URL`            | redis://127.0.0.1:6379   |
//! | `MEILI_URL`            | unset (search disabled)  |
//! | `SMTP_HOST`            | unset (emails logged)    |
//! | `SMTP_PORT`            | 587                      |
//! | `MAIL_FROM`            | noreply@localhost        |
//! | `MAIL_TO`              | admin@localhost          |
//! | `CORS_ORIGINS`         | http://localhost:3000    |
//! | `SESSION_TTL_SECS`     | 28800                    |
//! | `COOKIE_SECURE`        | true                     |
//! | `EMAIL_*`              | see [`QueueConfig`]      |
//!
//! Secrets: `ADMIN_API_KEY` (required), `MEILI_ADMIN_KEY`, `SMTP_USERNAME`, `SMTP_PASSWORD`.
use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

const SECRETS_DIR: &str = "/run/secrets";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value `{value}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Missing required secret {0}")]
    MissingSecret(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Redis,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("expected `memory` or `redis`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Email retry queue knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `EMAIL_PROCESS_INTERVAL_MS`
    pub process_interval: Duration,
    /// `EMAIL_MAX_CONCURRENT`
    pub max_concurrent: usize,
    /// `EMAIL_SEND_DELAY_MS`
    pub send_delay: Duration,
    /// `EMAIL_MAX_ATTEMPTS`
    pub max_attempts: u32,
    /// `EMAIL_BASE_BACKOFF_MS`
    pub base_backoff: Duration,
    /// `EMAIL_MAX_BACKOFF_MS`
    pub max_backoff: Duration,
    /// `EMAIL_KEEP_SENT`, sent jobs kept for inspection before the oldest are dropped
    pub keep_sent: usize,
    /// `EMAIL_QUEUE_SNAPSHOT`
    pub snapshot_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            process_interval: Duration::from_millis(1_000),
            max_concurrent: 3,
            send_delay: Duration::from_millis(500),
            max_attempts: 3,
            base_backoff: Duration::from_millis(2_000),
            max_backoff: Duration::from_secs(300),
            keep_sent: 50,
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backend: Backend,
    pub redis_url: String,
    pub meili_url: Option<String>,
    pub meili_key: Option<String>,
    pub admin_api_key: String,
    pub smtp: Option<SmtpConfig>,
    pub mail_from: String,
    pub mail_to: String,
    pub cors_origins: Vec<String>,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1111,
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            meili_url: None,
            meili_key: None,
            admin_api_key: String::new(),
            smtp: None,
            mail_from: "noreply@localhost".to_string(),
            mail_to: "admin@localhost".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            session_ttl: Duration::from_secs(8 * 60 * 60),
            cookie_secure: true,
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let admin_api_key = read_secret("ADMIN_API_KEY")
            .ok_or_else(|| ConfigError::MissingSecret("ADMIN_API_KEY".to_string()))?;

        let smtp = match optional("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: try_load("SMTP_PORT", "587")?,
                username: read_secret("SMTP_USERNAME"),
                password: read_secret("SMTP_PASSWORD"),
            }),
            None => {
                warn!("SMTP_HOST not set, outgoing emails will only be logged");
                None
            }
        };

        let meili_url = optional("MEILI_URL");
        let meili_key = meili_url.as_ref().and_then(|_| read_secret("MEILI_ADMIN_KEY"));

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            backend: try_load("STORE_BACKEND", "memory")?,
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            meili_url,
            meili_key,
            admin_api_key,
            smtp,
            mail_from: try_load("MAIL_FROM", "noreply@localhost")?,
            mail_to: try_load("MAIL_TO", "admin@localhost")?,
            cors_origins: try_load::<String>("CORS_ORIGINS", "http://localhost:3000")?
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            session_ttl: Duration::from_secs(try_load("SESSION_TTL_SECS", "28800")?),
            cookie_secure: try_load("COOKIE_SECURE", "true")?,
            queue: QueueConfig {
                process_interval: Duration::from_millis(try_load(
                    "EMAIL_PROCESS_INTERVAL_MS",
                    "1000",
                )?),
                max_concurrent: try_load("EMAIL_MAX_CONCURRENT", "3")?,
                send_delay: Duration::from_millis(try_load("EMAIL_SEND_DELAY_MS", "500")?),
                max_attempts: try_load("EMAIL_MAX_ATTEMPTS", "3")?,
                base_backoff: Duration::from_millis(try_load("EMAIL_BASE_BACKOFF_MS", "2000")?),
                max_backoff: Duration::from_millis(try_load("EMAIL_MAX_BACKOFF_MS", "300000")?),
                keep_sent: try_load("EMAIL_KEEP_SENT", "50")?,
                snapshot_path: optional("EMAIL_QUEUE_SNAPSHOT").map(PathBuf::from),
            },
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn optional(key: &str) -> Option<String> {
    var(key).or_else(|| {
        info!("{key} not set");
        None
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");

        ConfigError::Invalid {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        }
    })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("{SECRETS_DIR}/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Some(secret.trim().to_string()).filter(|s| !s.is_empty()),
        Err(e) => {
            info!("Failed to read {secret_name} from file ({e}), trying environment");
            var(secret_name)
        }
    }
}
