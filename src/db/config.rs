use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub backend: StoreBackend,
    pub primary_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub run_migrations: bool,
    pub seed_path: Option<PathBuf>,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, DbConfigError> {
        let primary_url = std::env::var("DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let forced = std::env::var("PRACTICE_STORE")
            .ok()
            .map(|value| value.trim().to_ascii_lowercase());

        let backend = match forced.as_deref() {
            Some("memory") => StoreBackend::Memory,
            Some("postgres") => {
                if primary_url.is_none() {
                    return Err(DbConfigError::Missing { key: "DATABASE_URL" });
                }
                StoreBackend::Postgres
            }
            Some(other) if !other.is_empty() => {
                return Err(DbConfigError::Invalid {
                    key: "PRACTICE_STORE",
                    value: other.to_string(),
                });
            }
            _ if primary_url.is_some() => StoreBackend::Postgres,
            _ => StoreBackend::Memory,
        };

        let seed_path = std::env::var("PRACTICE_SEED_FILE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            backend,
            primary_url,
            max_connections: env_u32("DB_MAX_CONNECTIONS", 10),
            acquire_timeout: Duration::from_millis(env_u64("DB_ACQUIRE_TIMEOUT_MS", 5000)),
            run_migrations: env_bool("DB_RUN_MIGRATIONS", true),
            seed_path,
        })
    }
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("missing required env var {key}")]
    Missing { key: &'static str },
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
