use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::AppError;

/// Global application configuration loaded from environment variables.
///
/// Every required value is checked when the config is built, so a worker
/// with missing credentials never starts consuming messages.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,

    /// Redis connection string
    pub redis_url: String,

    pub queue: QueueConfig,

    pub email: EmailConfig,

    /// Apply bundled migrations on startup (default: false, tables are owned externally)
    pub run_migrations: bool,
}

/// Where the PostgreSQL server lives and how to reach it.
#[derive(Debug, Clone)]
pub enum DatabaseTarget {
    /// A full `postgres://` connection string.
    Url(String),
    /// Discrete connection parameters.
    Parts {
        host: String,
        port: u16,
        name: String,
        user: String,
        password: String,
    },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub target: DatabaseTarget,

    /// TLS negotiation mode (default: prefer)
    pub ssl_mode: PgSslMode,

    /// Maximum number of PostgreSQL connections in the pool (default: 5)
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Build sqlx connect options from the configured target.
    pub fn connect_options(&self) -> Result<PgConnectOptions, AppError> {
        let options = match &self.target {
            DatabaseTarget::Url(url) => PgConnectOptions::from_str(url)
                .map_err(|e| AppError::Config(format!("DATABASE_URL is invalid: {}", e)))?,
            DatabaseTarget::Parts {
                host,
                port,
                name,
                user,
                password,
            } => PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(name)
                .username(user)
                .password(password),
        };

        Ok(options.ssl_mode(self.ssl_mode))
    }
}

/// Redis-list queue that carries notification ids.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name of the Redis list messages are pushed to (default: notificationqueue)
    pub name: String,

    /// Deliveries before a transiently failing message is dead-lettered (default: 10)
    pub max_delivery_attempts: u32,

    /// Blocking pop timeout in seconds (default: 5)
    pub poll_timeout_secs: u64,

    /// Lifetime of a consumer's heartbeat key in seconds (default: 30)
    pub heartbeat_ttl_secs: u64,

    /// First retry delay in seconds, doubled per attempt (default: 5)
    pub retry_base_secs: u64,

    /// Upper bound on the retry delay in seconds (default: 300)
    pub retry_max_secs: u64,
}

impl QueueConfig {
    /// List holding the message one consumer is currently handling.
    pub fn processing_key(&self, consumer_id: &str) -> String {
        format!("{}:processing:{}", self.name, consumer_id)
    }

    /// Set of consumer ids that may own a processing list.
    pub fn consumers_key(&self) -> String {
        format!("{}:consumers", self.name)
    }

    /// Expiring key that marks a consumer as alive.
    pub fn heartbeat_key(&self, consumer_id: &str) -> String {
        format!("{}:heartbeat:{}", self.name, consumer_id)
    }

    /// Sorted set of messages waiting out a retry delay, scored by due time in ms.
    pub fn delayed_key(&self) -> String {
        format!("{}:delayed", self.name)
    }

    /// List holding messages that will not be retried.
    pub fn dead_letter_key(&self) -> String {
        format!("{}:deadletter", self.name)
    }

    /// Hash of message body -> delivery attempt count.
    pub fn attempts_key(&self) -> String {
        format!("{}:attempts", self.name)
    }

    /// Delay before the given attempt is redelivered: `base * 2^(attempts - 1)`, capped.
    pub fn retry_delay_secs(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(32);
        self.retry_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_secs)
    }
}

/// How outgoing email is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailDeliveryMode {
    /// Log each message without calling the email API.
    LogOnly,
    /// Submit each message to the SendGrid v3 API.
    SendGrid,
}

impl FromStr for EmailDeliveryMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "log_only" => Ok(EmailDeliveryMode::LogOnly),
            "sendgrid" => Ok(EmailDeliveryMode::SendGrid),
            other => Err(AppError::Config(format!(
                "EMAIL_DELIVERY_MODE must be 'log' or 'sendgrid', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for EmailDeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmailDeliveryMode::LogOnly => write!(f, "log"),
            EmailDeliveryMode::SendGrid => write!(f, "sendgrid"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Sender address on every outgoing message
    pub from_address: String,

    /// SendGrid API key
    pub api_key: String,

    /// Delivery backend (default: log)
    pub delivery_mode: EmailDeliveryMode,

    /// SendGrid API base URL (default: https://api.sendgrid.com)
    pub api_base_url: String,

    /// Per-request timeout in seconds (default: 10)
    pub timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let target = match non_empty(&lookup, "DATABASE_URL") {
            Some(url) => DatabaseTarget::Url(url),
            None => DatabaseTarget::Parts {
                host: required(&lookup, "DB_HOST")?,
                port: parsed(&lookup, "DB_PORT", 5432)?,
                name: required(&lookup, "DB_NAME")?,
                user: required(&lookup, "DB_USER")?,
                password: required(&lookup, "DB_PASSWORD")?,
            },
        };

        let ssl_mode = non_empty(&lookup, "DB_SSL_MODE")
            .unwrap_or_else(|| "prefer".to_string())
            .parse::<PgSslMode>()
            .map_err(|e| AppError::Config(format!("DB_SSL_MODE is invalid: {}", e)))?;

        let database = DatabaseConfig {
            target,
            ssl_mode,
            max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 5)?,
        };

        let queue = QueueConfig {
            name: non_empty(&lookup, "QUEUE_NAME")
                .unwrap_or_else(|| "notificationqueue".to_string()),
            max_delivery_attempts: parsed(&lookup, "QUEUE_MAX_DELIVERY_ATTEMPTS", 10)?,
            poll_timeout_secs: parsed(&lookup, "QUEUE_POLL_TIMEOUT_SECS", 5)?,
            heartbeat_ttl_secs: parsed(&lookup, "QUEUE_HEARTBEAT_TTL_SECS", 30)?,
            retry_base_secs: parsed(&lookup, "QUEUE_RETRY_BASE_SECS", 5)?,
            retry_max_secs: parsed(&lookup, "QUEUE_RETRY_MAX_SECS", 300)?,
        };
        if queue.max_delivery_attempts == 0 {
            return Err(AppError::Config(
                "QUEUE_MAX_DELIVERY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if queue.heartbeat_ttl_secs <= queue.poll_timeout_secs {
            return Err(AppError::Config(
                "QUEUE_HEARTBEAT_TTL_SECS must be greater than QUEUE_POLL_TIMEOUT_SECS"
                    .to_string(),
            ));
        }

        let email = EmailConfig {
            from_address: required(&lookup, "FROM_EMAIL_ADDRESS")?,
            api_key: required(&lookup, "SENDGRID_API_KEY")?,
            delivery_mode: match non_empty(&lookup, "EMAIL_DELIVERY_MODE") {
                Some(mode) => mode.parse()?,
                None => EmailDeliveryMode::LogOnly,
            },
            api_base_url: non_empty(&lookup, "SENDGRID_API_URL")
                .unwrap_or_else(|| "https://api.sendgrid.com".to_string()),
            timeout_secs: parsed(&lookup, "EMAIL_TIMEOUT_SECS", 10)?,
        };

        Ok(Self {
            database,
            redis_url: non_empty(&lookup, "REDIS_URL")
                .unwrap_or_else(|| "redis://localhost:6379".to_string()),
            queue,
            email,
            run_migrations: parsed(&lookup, "RUN_MIGRATIONS", false)?,
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, key)
        .ok_or_else(|| AppError::Config(format!("{} environment variable is required", key)))
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}
