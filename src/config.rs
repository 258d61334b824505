//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default location of the rating database.
pub const DEFAULT_DB_PATH: &str = "./data/rating.db";

/// Default base URL of the model-serving endpoint.
pub const DEFAULT_PREDICTOR_URL: &str = "http://127.0.0.1:8000";

/// Bot configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram Bot API token. `None` disables the Telegram channel.
    pub telegram_token: Option<SecretString>,
    /// Usernames or numeric ids allowed to talk to the bot (`*` = everyone).
    pub allowed_users: Vec<String>,
    /// Whether to attach the stdin/stdout channel.
    pub cli_enabled: bool,
    /// Path of the libSQL rating database.
    pub db_path: PathBuf,
    /// Base URL of the prediction service.
    pub predictor_url: String,
    /// Upper bound on a single prediction call.
    pub predictor_timeout: Duration,
    /// Sessions idle longer than this are dropped by the pruning task.
    pub session_idle_timeout: Duration,
    /// Port of the reporting HTTP server.
    pub http_port: u16,
    /// Predicted prices below this are reported as this value.
    pub min_price: Decimal,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            allowed_users: vec!["*".to_string()],
            cli_enabled: false,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            predictor_url: DEFAULT_PREDICTOR_URL.to_string(),
            predictor_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
            http_port: 8080,
            min_price: dec!(50000),
        }
    }
}

impl BotConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// Unparseable numeric values fall back to their defaults. Fails only when
    /// no channel at all would be enabled.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let telegram_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        let allowed_users: Vec<String> = lookup("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let cli_enabled = lookup("CAR_BOT_CLI")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        if telegram_token.is_none() && !cli_enabled {
            return Err(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".to_string()));
        }

        let db_path = lookup("CAR_BOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let predictor_url = lookup("CAR_BOT_PREDICTOR_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.predictor_url);

        let predictor_timeout = lookup("CAR_BOT_PREDICTOR_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.predictor_timeout);

        let session_idle_timeout = lookup("CAR_BOT_SESSION_IDLE_MIN")
            .and_then(|s| s.parse::<u64>().ok())
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_idle_timeout);

        let http_port: u16 = lookup("CAR_BOT_HTTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.http_port);

        let min_price = lookup("CAR_BOT_MIN_PRICE")
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(defaults.min_price);

        Ok(Self {
            telegram_token,
            allowed_users,
            cli_enabled,
            db_path,
            predictor_url,
            predictor_timeout,
            session_idle_timeout,
            http_port,
            min_price,
        })
    }
}
