//! TOML configuration for a sync deployment.
//!
//! ```toml
//! database = "macroeconomic_data.db"
//! parallelism = 4
//! log_level = "info"
//!
//! [source]
//! kind = "yahoo"
//! timeout_secs = 30
//! max_retries = 3
//!
//! [[series]]
//! symbol = "^GSPC"
//! id = "SyP_500"
//! group = "US"
//! ```
//!
//! Every key is optional. With no `[[series]]` entries the built-in index
//! registry is used.

use crate::data::{
    CircuitBreaker, CsvSource, FetchError, SeriesSource, YahooConfig, YahooSource, MAX_RETRIES,
};
use crate::domain::SeriesDescriptor;
use crate::registry::{RegistryError, SeriesRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATABASE: &str = "macroeconomic_data.db";
pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid series registry: {0}")]
    Registry(#[from] RegistryError),
}

/// Where observations come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Yahoo {
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    Csv {
        dir: PathBuf,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Yahoo {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_database() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE)
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Concurrent fetches per run.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<SeriesDescriptor>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            parallelism: DEFAULT_PARALLELISM,
            log_level: None,
            source: SourceConfig::default(),
            series: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid("parallelism must be at least 1".into()));
        }
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database path is empty".into()));
        }
        match &self.source {
            SourceConfig::Yahoo { timeout_secs: 0, .. } => {
                Err(ConfigError::Invalid("source.timeout_secs must be positive".into()))
            }
            SourceConfig::Yahoo { max_retries, .. } if *max_retries > MAX_RETRIES => Err(
                ConfigError::Invalid(format!("source.max_retries must be at most {MAX_RETRIES}")),
            ),
            SourceConfig::Csv { dir } if dir.as_os_str().is_empty() => {
                Err(ConfigError::Invalid("source.dir is empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// The configured series, or the built-in indices when none are listed.
    pub fn registry(&self) -> Result<SeriesRegistry, ConfigError> {
        if self.series.is_empty() {
            return Ok(SeriesRegistry::default_indices());
        }
        Ok(SeriesRegistry::from_descriptors(self.series.iter().cloned())?)
    }

    pub fn build_source(&self) -> Result<Box<dyn SeriesSource>, FetchError> {
        match &self.source {
            SourceConfig::Yahoo {
                timeout_secs,
                max_retries,
            } => {
                let config = YahooConfig {
                    timeout: Duration::from_secs(*timeout_secs),
                    max_retries: *max_retries,
                    ..YahooConfig::default()
                };
                let breaker = Arc::new(CircuitBreaker::default_provider());
                Ok(Box::new(YahooSource::new(config, breaker)?))
            }
            SourceConfig::Csv { dir } => Ok(Box::new(CsvSource::new(dir.clone()))),
        }
    }
}
