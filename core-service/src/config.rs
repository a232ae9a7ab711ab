//! # Service Configuration
//!
//! Host-facing configuration: streaming parameters plus logging settings,
//! loadable from a JSON document. Every field is optional in the document.
//!
//! ```json
//! {
//!   "streaming": { "buffer_duration_ms": 250 },
//!   "logging": { "level": "Debug", "format": "json" }
//! }
//! ```

use crate::error::{Result, ServiceError};
use bridge_traits::LogLevel;
use core_playback::StreamingConfig;
use core_runtime::logging::{LogFormat, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Log output format as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatSetting> for LogFormat {
    fn from(setting: LogFormatSetting) -> Self {
        match setting {
            LogFormatSetting::Pretty => LogFormat::Pretty,
            LogFormatSetting::Json => LogFormat::Json,
            LogFormatSetting::Compact => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: LogLevel,
    /// Unset picks the build default (pretty in debug, compact in release).
    #[serde(default)]
    pub format: Option<LogFormatSetting>,
    /// Full `EnvFilter` directive, overriding `level`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: None,
            filter: None,
        }
    }
}

impl LoggingSettings {
    pub fn to_logging_config(&self) -> LoggingConfig {
        let mut config = LoggingConfig::default().with_level(self.level);
        if let Some(format) = self.format {
            config = config.with_format(format.into());
        }
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

/// Top-level configuration for a [`SoundLibrary`](crate::SoundLibrary).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ServiceConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.streaming.validate().map_err(ServiceError::Config)
    }
}
