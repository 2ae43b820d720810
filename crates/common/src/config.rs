//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pattern::DEFAULT_PATTERN;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default capture settings.
    pub capture: CaptureDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default capture session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureDefaults {
    /// Signaling pattern (`0`/`1` string).
    pub pattern: String,

    /// Total session duration in milliseconds.
    pub total_duration_ms: u64,

    /// Per-tick settle delay in milliseconds (signal propagation time
    /// between flipping the display and pulling the frame).
    pub settle_ms: u64,

    /// Encoder bitrate in bits per second. Fixed policy value, not a
    /// per-session parameter.
    pub bitrate: u32,

    /// Encoder nominal framerate. Fixed policy value.
    pub framerate: u32,

    /// Resolution used when the source still reports zero dimensions
    /// after the grace retry.
    pub fallback_width: u32,
    pub fallback_height: u32,

    /// Grace delay before the single dimension re-probe, milliseconds.
    pub source_retry_delay_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "blinkcap=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture: CaptureDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            total_duration_ms: 10_000,
            settle_ms: 40,
            bitrate: 500_000,
            framerate: 2,
            fallback_width: 320,
            fallback_height: 240,
            source_retry_delay_ms: 250,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("blinkcap").join("config.json")
}
