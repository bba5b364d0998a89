//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CinemagraphError, CinemagraphResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Frame pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Artifact delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Frame pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Target playback rate the capture is resampled to.
    pub fps: f64,

    /// Fallback color for partially transparent pixels.
    pub matte: [u8; 3],

    /// Color key the output format renders as see-through.
    pub transparent: [u8; 3],

    /// How freeze zones are blended against the reference frame.
    #[serde(default)]
    pub blend_mode: BlendMode,
}

/// Blend policy for freeze zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// `out = a * ref + (1 - a) * orig`, with `a = mask / 255`.
    #[default]
    Weighted,
    /// Any non-zero mask value copies the reference pixel verbatim.
    Overwrite,
}

/// Where finished artifacts are sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Upload endpoint. Delivery is disabled when unset.
    pub endpoint: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cinemagraph=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps: 16.0,
            matte: [255, 255, 255],
            transparent: [0, 255, 0],
            blend_mode: BlendMode::Weighted,
        }
    }
}

impl PipelineConfig {
    /// Seconds each output frame is shown.
    pub fn frame_delay_secs(&self) -> f64 {
        1.0 / self.fps
    }

    pub fn validate(&self) -> CinemagraphResult<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(CinemagraphError::config(format!(
                "fps must be a positive number, got {}",
                self.fps
            )));
        }
        Ok(())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 60,
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
    base.join("cinemagraph").join("config.json")
}
