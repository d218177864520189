//! Configuration module for pingwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::probe::DEFAULT_PROBE_TIMEOUT;
use crate::scheduler::DEFAULT_FAILURE_LOG_CAPACITY;

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the command API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pingwatch.db")
    pub db_path: String,
    /// Entries kept in the failure log (default: 100)
    pub failure_log_capacity: usize,
    /// Connect timeout for every probe in milliseconds (default: 5000)
    pub probe_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pingwatch.db".to_string(),
            failure_log_capacity: DEFAULT_FAILURE_LOG_CAPACITY,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PINGWATCH_DB_PATH`: Database file path (default: "pingwatch.db")
    /// - `PINGWATCH_FAILURE_LOG_CAPACITY`: failure log size (default: 100)
    /// - `PINGWATCH_PROBE_TIMEOUT_MS`: probe timeout (default: 5000)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_nonzero::<u16>(lookup("PINGWATCH_HTTP_PORT")) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("PINGWATCH_DB_PATH").filter(|p| !p.is_empty()) {
            cfg.db_path = db_path;
        }

        if let Some(capacity) = parse_nonzero::<usize>(lookup("PINGWATCH_FAILURE_LOG_CAPACITY")) {
            cfg.failure_log_capacity = capacity;
        }

        if let Some(timeout) = parse_nonzero::<u64>(lookup("PINGWATCH_PROBE_TIMEOUT_MS")) {
            cfg.probe_timeout_ms = timeout;
        }

        cfg
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn parse_nonzero<T>(value: Option<String>) -> Option<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v != T::default())
}
