use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::tcc::fence::CleanerConfig;
use crate::tcc::resource::DEFAULT_RESOURCE_GROUP;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "CONFIG_IO",
            ConfigError::Parse(_) => "CONFIG_PARSE",
            ConfigError::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TccConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Resource group announced with every registered resource
    #[serde(default = "default_resource_group")]
    pub resource_group_id: String,
    #[serde(default)]
    pub registrar: RegistrarConfig,
    #[serde(default)]
    pub fence: FenceConfig,
}

fn default_resource_group() -> String {
    DEFAULT_RESOURCE_GROUP.to_string()
}

impl Default for TccConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "tcc-participant.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            resource_group_id: default_resource_group(),
            registrar: RegistrarConfig::default(),
            fence: FenceConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistrarConfig {
    /// Pending registrations buffered towards the coordinator transport
    pub channel_buffer: usize,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 256,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FenceStoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FenceConfig {
    pub enabled: bool,
    pub store: FenceStoreKind,
    /// Required when `store` is postgres
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub suspicious_timeout_secs: u64,
    pub clean_interval_secs: u64,
    pub retention_hours: u64,
    pub clean_batch_size: usize,
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: FenceStoreKind::Memory,
            postgres_url: None,
            suspicious_timeout_secs: 60,
            clean_interval_secs: 3600,
            retention_hours: 24,
            clean_batch_size: 1000,
        }
    }
}

impl FenceConfig {
    pub fn suspicious_timeout(&self) -> Duration {
        Duration::from_secs(self.suspicious_timeout_secs)
    }

    pub fn cleaner(&self) -> CleanerConfig {
        CleanerConfig {
            clean_interval: Duration::from_secs(self.clean_interval_secs),
            retention: Duration::from_secs(self.retention_hours * 3600),
            batch_size: self.clean_batch_size,
        }
    }
}

impl TccConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: TccConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.registrar.channel_buffer == 0 {
            return Err(ConfigError::Invalid(
                "registrar.channel_buffer must be > 0".to_string(),
            ));
        }
        if self.fence.enabled
            && self.fence.store == FenceStoreKind::Postgres
            && self.fence.postgres_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Invalid(
                "fence.postgres_url is required for the postgres fence store".to_string(),
            ));
        }
        if self.fence.enabled && self.fence.suspicious_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fence.suspicious_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
