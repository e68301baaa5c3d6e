//! # Structured Logging
//!
//! Installs the process-wide `tracing` subscriber. The cache layer itself only
//! emits events through the `tracing` macros; the hosting service decides
//! whether to call [`init_logging`] or to install its own subscriber.

use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    /// Parse the configured level, falling back to INFO
    pub fn level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (tests, or a host
/// that configured its own), in which case nothing changes.
pub fn init_logging(config: &LogConfig) -> bool {
    let env_filter = EnvFilter::from_default_env().add_directive(config.level().into());

    let installed = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        info!(level = %config.level, format = ?config.format, "Structured logging initialized");
    } else {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        let mut config = LogConfig::default();
        assert_eq!(config.level(), Level::INFO);
        config.level = "DEBUG".to_string();
        assert_eq!(config.level(), Level::DEBUG);
        config.level = "verbose".to_string();
        assert_eq!(config.level(), Level::INFO);
    }

    #[test]
    fn test_second_init_is_a_noop() {
        let config = LogConfig {
            level: "warn".to_string(),
            format: LogFormat::Text,
        };
        init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let config: LogConfig = serde_yaml::from_str("level: debug\nformat: text\n").unwrap();
        assert_eq!(config.format, LogFormat::Text);
    }
}
