use crate::error::InitError;
use crate::host::ActivitySignal;
use crate::watcher::ActivityPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest poll interval whose length still fits in microseconds.
pub const MAX_POLL_INTERVAL_SECS: u64 = u64::MAX / 1_000_000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub poll_interval_secs: u64,
    pub idle_threshold_micros: u64,
    pub policy: ActivityPolicy,
    pub signals: Vec<ActivitySignal>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            idle_threshold_micros: 2_000_000,
            policy: ActivityPolicy::default(),
            signals: ActivitySignal::ALL.to_vec(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn set_idle_threshold(&mut self, idle: Duration) -> Result<(), InitError> {
        self.idle_threshold_micros =
            u64::try_from(idle.as_micros()).map_err(|_| InitError::InvalidConfig {
                field: "idle_threshold_micros",
                reason: format!("{} does not fit in microseconds", humantime::format_duration(idle)),
            })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), InitError> {
        if self.poll_interval_secs == 0 {
            return Err(InitError::InvalidConfig {
                field: "poll_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            return Err(InitError::InvalidConfig {
                field: "poll_interval_secs",
                reason: format!("must be at most {}", MAX_POLL_INTERVAL_SECS),
            });
        }
        if self.idle_threshold_micros == 0 {
            return Err(InitError::InvalidConfig {
                field: "idle_threshold_micros",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.signals.is_empty() {
            return Err(InitError::InvalidConfig {
                field: "signals",
                reason: "at least one activity signal is required".to_string(),
            });
        }
        Ok(())
    }
}

pub fn get_base_dir() -> Result<PathBuf> {
    let mut path =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    path.push(".hidecursor");
    if !path.exists() {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

pub fn load_config() -> Result<Config> {
    let path = get_base_dir()?.join("config.json");
    load_config_from(&path)
}

/// Reads the config at `path`, writing the defaults there first if it is missing.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        let data = serde_json::to_string_pretty(&config)?;
        fs::write(path, data)?;
        return Ok(config);
    }

    let data = fs::read_to_string(path)?;
    let config = serde_json::from_str(&data)?;
    Ok(config)
}
