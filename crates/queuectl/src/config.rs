use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::{retry::RetryConfig, PoolOptions};

// Runtime configuration for the worker process and the CLI, read from the
// environment (and `.env` when present). Queue retry settings are not here:
// they live in `config.json` next to the job files, see `SettingsRepo`.
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub admin_addr: Option<String>,
    pub backoff_unit_ms: u64,
    pub max_backoff_secs: Option<u64>,
    pub backoff_jitter_pct: f64,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let data_dir = env_or_fallback("QUEUECTL_DATA_DIR", "DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let workers = env_or_fallback("QUEUECTL_WORKERS", "WORKERS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, 64);

        let poll_interval_ms = env_or_fallback("QUEUECTL_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(250);

        let admin_addr = env_or_fallback("QUEUECTL_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let backoff_unit_ms = env_or_fallback("QUEUECTL_BACKOFF_UNIT_MS", "BACKOFF_UNIT_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        let max_backoff_secs = env_or_fallback("QUEUECTL_MAX_BACKOFF_SECS", "MAX_BACKOFF_SECS")
            .and_then(|s| s.parse().ok());

        let backoff_jitter_pct =
            match env_or_fallback("QUEUECTL_BACKOFF_JITTER_PCT", "BACKOFF_JITTER_PCT") {
                Some(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("BACKOFF_JITTER_PCT is not a number: {raw}"))?,
                None => 0.0,
            };
        if !(0.0..1.0).contains(&backoff_jitter_pct) {
            anyhow::bail!("BACKOFF_JITTER_PCT must be in [0, 1), got {backoff_jitter_pct}");
        }

        let log_json = env_bool("QUEUECTL_LOG_JSON").unwrap_or(false);

        Ok(Self {
            data_dir,
            workers,
            poll_interval_ms,
            admin_addr,
            backoff_unit_ms,
            max_backoff_secs,
            backoff_jitter_pct,
            log_json,
        })
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry: RetryConfig {
                unit: Duration::from_millis(self.backoff_unit_ms),
                max_delay: self.max_backoff_secs.map(Duration::from_secs),
                jitter_pct: self.backoff_jitter_pct,
            },
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
