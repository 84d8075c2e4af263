use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::MAX_BUFFER_HOURS;
use crate::model::{Ms, SECOND_MS};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Knobs the reservation engine itself consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Turnaround gap applied when an item has no override.
    pub buffer_hours: u32,
    /// How long a booking may sit in pending_payment before the sweeper expires it.
    pub payment_window_ms: Ms,
    /// Upper bound on each collaborator call made while pricing.
    pub collaborator_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_hours: 0,
            payment_window_ms: 900 * SECOND_MS,
            collaborator_timeout_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_hours > MAX_BUFFER_HOURS {
            return Err(ConfigError::Invalid(format!(
                "buffer_hours {} exceeds {MAX_BUFFER_HOURS}",
                self.buffer_hours
            )));
        }
        if self.payment_window_ms <= 0 {
            return Err(ConfigError::Invalid("payment window must be positive".into()));
        }
        if self.collaborator_timeout_ms == 0 {
            return Err(ConfigError::Invalid("collaborator timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Daemon settings, read from `RENTAL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub sweep_interval_secs: u64,
    pub pricing_config: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub engine: EngineConfig,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            buffer_hours: env_parse("RENTAL_BUFFER_HOURS").unwrap_or(defaults.buffer_hours),
            payment_window_ms: env_parse::<i64>("RENTAL_PAYMENT_WINDOW_SECS")
                .map(|s| s.saturating_mul(SECOND_MS))
                .unwrap_or(defaults.payment_window_ms),
            collaborator_timeout_ms: env_parse("RENTAL_COLLABORATOR_TIMEOUT_MS")
                .unwrap_or(defaults.collaborator_timeout_ms),
        };
        engine.validate()?;

        let config = Self {
            bind: std::env::var("RENTAL_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("RENTAL_PORT").unwrap_or(7878),
            data_dir: std::env::var("RENTAL_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            max_connections: env_parse("RENTAL_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: env_parse("RENTAL_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: env_parse("RENTAL_METRICS_PORT"),
            sweep_interval_secs: env_parse("RENTAL_SWEEP_INTERVAL_SECS").unwrap_or(30),
            pricing_config: std::env::var_os("RENTAL_PRICING_CONFIG").map(PathBuf::from),
            catalog: std::env::var_os("RENTAL_CATALOG").map(PathBuf::from),
            engine,
        };
        if config.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be positive".into()));
        }
        if config.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep interval must be positive".into()));
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
