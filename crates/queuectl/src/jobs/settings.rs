use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::jobs::error::SettingsError;
use crate::jobs::lock::DirLock;
use crate::jobs::store::{load_json, save_json};

pub const CONFIG_FILE: &str = "config.json";

/// Retry settings shared by every worker, persisted in `config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    MaxRetries,
    BackoffBase,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::MaxRetries => "max_retries",
            SettingKey::BackoffBase => "backoff_base",
        }
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "max_retries" => Ok(SettingKey::MaxRetries),
            "backoff_base" => Ok(SettingKey::BackoffBase),
            _ => Err(SettingsError::UnknownKey(s.to_string())),
        }
    }
}

impl QueueSettings {
    pub fn value_of(&self, key: SettingKey) -> Value {
        match key {
            SettingKey::MaxRetries => Value::from(self.max_retries),
            SettingKey::BackoffBase => Value::from(self.backoff_base),
        }
    }

    /// Parse and apply one `key = value` pair, leaving `self` untouched on error.
    pub fn apply(&mut self, key: SettingKey, raw: &str) -> Result<(), SettingsError> {
        let raw = raw.trim();
        match key {
            SettingKey::MaxRetries => {
                self.max_retries = raw.parse().map_err(|_| SettingsError::InvalidValue {
                    key: key.as_str(),
                    value: raw.to_string(),
                    reason: "expected a non-negative integer",
                })?;
            }
            SettingKey::BackoffBase => {
                let base: f64 = raw.parse().map_err(|_| SettingsError::InvalidValue {
                    key: key.as_str(),
                    value: raw.to_string(),
                    reason: "expected a number",
                })?;
                check_backoff_base(base)?;
                self.backoff_base = base;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        check_backoff_base(self.backoff_base)
    }
}

fn check_backoff_base(base: f64) -> Result<(), SettingsError> {
    if !base.is_finite() || base <= 1.0 {
        return Err(SettingsError::InvalidValue {
            key: SettingKey::BackoffBase.as_str(),
            value: base.to_string(),
            reason: "must be a finite number greater than 1",
        });
    }
    Ok(())
}

/// Reads and writes `config.json`. A missing file means defaults.
///
/// Takes the same directory lock as `JobStore`, so a `set` from another
/// process cannot drop a concurrent update.
#[derive(Clone)]
pub struct SettingsRepo {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
    dir_lock: DirLock,
}

impl SettingsRepo {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(CONFIG_FILE),
            lock: Arc::new(Mutex::new(())),
            dir_lock: DirLock::new(data_dir),
        }
    }

    pub async fn get(&self) -> Result<QueueSettings, SettingsError> {
        let _guard = self.lock.lock().await;
        let _dir = self.dir_lock.acquire().await?;
        self.load().await
    }

    pub async fn get_value(&self, key: &str) -> Result<Value, SettingsError> {
        let key: SettingKey = key.parse()?;
        Ok(self.get().await?.value_of(key))
    }

    /// Validate and persist one setting; returns the settings now in effect.
    pub async fn set(&self, key: &str, value: &str) -> Result<QueueSettings, SettingsError> {
        let key: SettingKey = key.parse()?;

        let _guard = self.lock.lock().await;
        let _dir = self.dir_lock.acquire().await?;
        let mut settings = self.load().await?;
        settings.apply(key, value)?;
        save_json(&self.path, &settings).await?;

        tracing::info!(key = key.as_str(), value = %value.trim(), "updated queue setting");
        Ok(settings)
    }

    async fn load(&self) -> Result<QueueSettings, SettingsError> {
        let settings: QueueSettings = load_json(&self.path).await?.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }
}
