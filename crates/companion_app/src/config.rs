use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use companion_engine::{ClientSettings, StoreSettings, TaskSettings, TransportSettings};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogDestination;

pub const CONFIG_FILENAME: &str = "companion.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: ron::error::SpannedError,
    },
}

/// Settings read from `companion.ron`. Every field may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub storage_key: String,
    pub flush_interval_ms: u64,
    pub max_age_hours: u64,
    pub success_grace_secs: u64,
    pub failure_grace_secs: u64,
    pub auth_token_key: String,
    pub log_destination: LogDestination,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
            storage_key: "page-state-storage".to_string(),
            flush_interval_ms: 1_000,
            max_age_hours: 24,
            success_grace_secs: 5,
            failure_grace_secs: 10,
            auth_token_key: "token".to_string(),
            log_destination: LogDestination::File,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Read `path`; `Ok(None)` when the file does not exist.
    pub fn try_load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        ron::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })
    }

    pub fn level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            storage_key: self.storage_key.clone(),
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            max_age: Duration::from_secs(self.max_age_hours * 60 * 60),
        }
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            success_grace: Duration::from_secs(self.success_grace_secs),
            failure_grace: Duration::from_secs(self.failure_grace_secs),
        }
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            base_url: self.api_base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..TransportSettings::default()
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            auth_token_key: self.auth_token_key.clone(),
            ..ClientSettings::default()
        }
    }
}
