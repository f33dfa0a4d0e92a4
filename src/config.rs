use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "sehat-saathi";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 168;
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
pub const DEFAULT_WS_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:5000",
    "http://localhost:8080",
];

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "sehat_caregiver=info,tower_http=info,warn"
}

/// Default database location: `<data_local_dir>/sehat-saathi/caregivers.db`.
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("caregivers.db")
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration, read from `SEHAT_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub session_ttl: chrono::Duration,
    pub cors_origins: Vec<String>,
    pub ws_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or blank keys take their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("SEHAT_BIND_ADDR") {
            Some(v) => parse("SEHAT_BIND_ADDR", &v)?,
            None => parse("SEHAT_BIND_ADDR", DEFAULT_BIND_ADDR)?,
        };

        let db_path = get("SEHAT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let ttl_hours: i64 = match get("SEHAT_SESSION_TTL_HOURS") {
            Some(v) => parse("SEHAT_SESSION_TTL_HOURS", &v)?,
            None => DEFAULT_SESSION_TTL_HOURS,
        };
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&ttl_hours) {
            return Err(invalid(
                "SEHAT_SESSION_TTL_HOURS",
                ttl_hours,
                "must be between 1 and 8760",
            ));
        }

        let cors_origins = match get("SEHAT_CORS_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        };

        let ws_queue_capacity: usize = match get("SEHAT_WS_QUEUE_CAPACITY") {
            Some(v) => parse("SEHAT_WS_QUEUE_CAPACITY", &v)?,
            None => DEFAULT_WS_QUEUE_CAPACITY,
        };
        if ws_queue_capacity == 0 {
            return Err(invalid("SEHAT_WS_QUEUE_CAPACITY", 0, "must be at least 1"));
        }

        Ok(Self {
            bind_addr,
            db_path,
            session_ttl: chrono::Duration::hours(ttl_hours),
            cors_origins,
            ws_queue_capacity,
        })
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| invalid(key, value, &e.to_string()))
}
