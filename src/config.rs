//! Immutable, environment-sourced worker configuration.
//!
//! Loaded once at process start via [`WorkerConfig::from_env`] and passed by
//! reference/clone to every component at construction. No module-level
//! singleton: components that need configuration take it explicitly.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue {
                name,
                value: raw,
                reason: "could not parse".to_string(),
            }),
    }
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name,
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

fn default_worker_name() -> String {
    let host = hostname();
    format!("worker-{host}")
}

fn default_worker_id(startup_ms: u128) -> String {
    let host = hostname();
    format!("worker-{host}-{startup_ms}")
}

fn hostname() -> String {
    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub server_url: String,
    pub worker_key: String,
    pub worker_name: String,
    pub worker_id: String,
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub temp_dir: std::path::PathBuf,
    pub upload_retries: u32,
    pub log_level: String,
    pub shutdown_grace: Duration,
    pub tls_verify_origin: bool,
}

impl WorkerConfig {
    /// Builds configuration from the process environment. Fails only when
    /// `WORKER_KEY` is absent or a numeric/boolean field cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let worker_key = env::var("WORKER_KEY").map_err(|_| ConfigError::MissingWorkerKey)?;
        if worker_key.is_empty() {
            return Err(ConfigError::MissingWorkerKey);
        }

        let startup_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let poll_interval_ms: u64 = env_parsed("POLL_INTERVAL_MS", 5000)?;
        let heartbeat_interval_ms: u64 = env_parsed("HEARTBEAT_INTERVAL_MS", 30_000)?;
        let shutdown_grace_ms: u64 = env_parsed("SHUTDOWN_GRACE_MS", 2000)?;

        Ok(WorkerConfig {
            server_url: env_string("SERVER_URL", "http://localhost:5069"),
            worker_key,
            worker_name: env::var("WORKER_NAME").unwrap_or_else(|_| default_worker_name()),
            worker_id: env::var("WORKER_ID")
                .unwrap_or_else(|_| default_worker_id(startup_ms)),
            max_concurrent: env_parsed("MAX_CONCURRENT", 1usize)?,
            poll_interval: Duration::from_millis(poll_interval_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            temp_dir: std::path::PathBuf::from(env_string("TEMP_DIR", "/tmp/transcode")),
            upload_retries: env_parsed("UPLOAD_RETRIES", 3u32)?,
            log_level: env_string("LOG_LEVEL", "info"),
            shutdown_grace: Duration::from_millis(shutdown_grace_ms),
            tls_verify_origin: env_bool("TLS_VERIFY_ORIGIN", false)?,
        })
    }
}
