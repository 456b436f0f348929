use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::core::{Thresholds, ThumbnailShape};

pub const DEFAULT_VIEWER: &str = "qiv -f";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Thumbnail shape must be at least 1x1, got {width}x{height}")]
    InvalidShape { width: u32, height: u32 },

    #[error("Threshold `{name}` must be a finite, non-negative number, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("`near` ({near}) must not exceed `similar` ({similar})")]
    ThresholdOrder { near: f64, similar: f64 },

    #[error("Viewer command must not be empty")]
    EmptyViewer,
}

/// Run configuration. Every field is optional in the JSON file and falls
/// back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub thumbnail: ThumbnailShape,
    pub thresholds: Thresholds,
    /// Command (with flags) the generated script calls with two paths.
    pub viewer: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thumbnail: ThumbnailShape::default(),
            thresholds: Thresholds::default(),
            viewer: DEFAULT_VIEWER.to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ThumbnailShape { width, height } = self.thumbnail;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidShape { width, height });
        }

        let Thresholds { near, similar } = self.thresholds;
        for (name, value) in [("near", near), ("similar", similar)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if near > similar {
            return Err(ConfigError::ThresholdOrder { near, similar });
        }

        if self.viewer.trim().is_empty() {
            return Err(ConfigError::EmptyViewer);
        }
        Ok(())
    }
}
