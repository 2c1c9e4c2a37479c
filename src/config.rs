use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub session_expiry_hours: i64,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub request_timeout_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    /// A friend counts as "active" if seen within this many seconds.
    pub presence_window_secs: i64,
    /// Users idle longer than this are flipped offline by the sweep.
    pub presence_timeout_secs: i64,
    /// 0 disables the in-process sweep.
    pub presence_sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            database_url: "sqlite://social_chat.db?mode=rwc".to_string(),
            session_expiry_hours: 24,
            db_max_connections: 20,
            db_min_connections: 5,
            request_timeout_secs: 30,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            presence_window_secs: 180,
            presence_timeout_secs: 300,
            presence_sweep_interval_secs: 60,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Config::default();
        Ok(Config {
            server_host: std::env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: env_or("SERVER_PORT", defaults.server_port)?,
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            session_expiry_hours: env_or("SESSION_EXPIRY_HOURS", defaults.session_expiry_hours)?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            db_min_connections: env_or("DB_MIN_CONNECTIONS", defaults.db_min_connections)?,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            rate_limit_requests: env_or("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?,
            rate_limit_window_secs: env_or(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window_secs,
            )?,
            presence_window_secs: env_or("PRESENCE_WINDOW_SECS", defaults.presence_window_secs)?,
            presence_timeout_secs: env_or(
                "PRESENCE_TIMEOUT_SECS",
                defaults.presence_timeout_secs,
            )?,
            presence_sweep_interval_secs: env_or(
                "PRESENCE_SWEEP_INTERVAL_SECS",
                defaults.presence_sweep_interval_secs,
            )?,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs.max(0) as u64)
    }
}
