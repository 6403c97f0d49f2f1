//! Engine configuration.
//!
//! Runtime tuning for the input pipeline, loaded from
//! `~/.config/padhub/engine.toml`. A missing file is created with
//! defaults on startup; a missing key falls back per-field.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/padhub";
const ENGINE_CONFIG_FILE: &str = "engine.toml";

/// Errors while loading or writing the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

/// Tuning knobs for the whole engine.
///
/// The tick interval bounds macro timing accuracy: in-flight macros only
/// advance on ticks, so lower values tighten emission jitter at the cost
/// of more wakeups. The defaults suit a single consumer-grade gamepad.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Scheduler tick interval in milliseconds.
    pub tick_interval_ms: u64,

    /// Buffer capacity of the raw input channel.
    pub input_channel_capacity: usize,

    /// Buffer capacity of the synthetic output channel.
    pub output_channel_capacity: usize,

    /// Seconds between library autosaves.
    pub autosave_interval_secs: u64,

    /// Minimum axis change the collector forwards. Filters stick drift
    /// chatter before it reaches the engine; profile dead-zones are
    /// applied later and per-axis.
    pub axis_noise_floor: f32,

    /// Collector hardware poll interval in microseconds.
    pub poll_interval_us: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 4,
            input_channel_capacity: 1024,
            output_channel_capacity: 1024,
            autosave_interval_secs: 300,
            axis_noise_floor: 0.01,
            poll_interval_us: 500,
        }
    }
}

impl EngineSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Loads settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub async fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if !tokio::fs::try_exists(path).await? {
            debug!("{} does not exist, using default settings", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let settings =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        info!("Loaded engine settings from {}", path.display());
        Ok(settings)
    }

    /// Loads from the default location, writing a default file first when
    /// none exists yet.
    pub async fn load_or_init() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if !tokio::fs::try_exists(&path).await? {
            info!("Creating default engine config at {}", path.display());
            let settings = Self::default();
            settings.save_to(&path).await?;
            return Ok(settings);
        }
        Self::load_from(&path).await
    }

    pub async fn save_to(&self, path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// `~/.config/padhub/engine.toml`, current directory as a last resort.
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(ENGINE_CONFIG_FILE);
    path
}
