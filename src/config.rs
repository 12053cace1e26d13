// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{CameraBackendType, Size};
use crate::constants::{
    ASPECT_RATIO_TOLERANCE, CAMERA_OPEN_TIMEOUT, DEFAULT_FRAME_RATE, MAX_PREVIEW_HEIGHT,
    MAX_PREVIEW_WIDTH, RenderMode, THRESHOLD_DEFAULT, clamp_threshold,
};
use crate::errors::{AppError, AppResult};
use crate::pipeline::{PipelineOptions, RendererSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "edgecam";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use (synthetic or V4L2)
    pub backend: CameraBackendType,
    /// Threshold handed to the frame processor at startup
    pub threshold: i32,
    /// Preview width limit; never above the hardware limit
    pub max_preview_width: u32,
    /// Preview height limit; never above the hardware limit
    pub max_preview_height: u32,
    /// Maximum relative aspect ratio error when matching the screen
    pub aspect_tolerance: f64,
    /// How long opening the camera waits for the session permit
    pub camera_open_timeout_ms: u64,
    pub render_mode: RenderMode,
    /// Redraw rate in continuous mode
    pub frame_rate: u32,
    /// Frame rate of the synthetic camera
    pub synthetic_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            threshold: THRESHOLD_DEFAULT,
            max_preview_width: MAX_PREVIEW_WIDTH,
            max_preview_height: MAX_PREVIEW_HEIGHT,
            aspect_tolerance: ASPECT_RATIO_TOLERANCE,
            camera_open_timeout_ms: CAMERA_OPEN_TIMEOUT.as_millis() as u64,
            render_mode: RenderMode::default(),
            frame_rate: DEFAULT_FRAME_RATE,
            synthetic_fps: DEFAULT_FRAME_RATE,
        }
    }
}

impl Config {
    /// Default location: `<config dir>/edgecam/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_or_default(&path),
            None => {
                warn!("No config directory, using default settings");
                Self::default()
            }
        }
    }

    /// Load `path`, or defaults if it is missing or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config.sanitized())
    }

    pub fn save(&self) -> AppResult<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Config("no config directory".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Clamp every field into its valid range
    pub fn sanitized(mut self) -> Self {
        self.threshold = clamp_threshold(self.threshold);
        self.max_preview_width = match self.max_preview_width {
            0 => MAX_PREVIEW_WIDTH,
            w => w.min(MAX_PREVIEW_WIDTH),
        };
        self.max_preview_height = match self.max_preview_height {
            0 => MAX_PREVIEW_HEIGHT,
            h => h.min(MAX_PREVIEW_HEIGHT),
        };
        if !self.aspect_tolerance.is_finite() || self.aspect_tolerance < 0.0 {
            self.aspect_tolerance = ASPECT_RATIO_TOLERANCE;
        }
        if self.camera_open_timeout_ms == 0 {
            self.camera_open_timeout_ms = CAMERA_OPEN_TIMEOUT.as_millis() as u64;
        }
        self.frame_rate = self.frame_rate.max(1);
        self.synthetic_fps = self.synthetic_fps.max(1);
        self
    }

    pub fn max_preview(&self) -> Size {
        Size::new(self.max_preview_width, self.max_preview_height)
    }

    pub fn camera_open_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_open_timeout_ms)
    }

    /// Pipeline options for a screen described by `display`
    pub fn pipeline_options(
        &self,
        display: crate::backends::camera::DisplayMetrics,
    ) -> PipelineOptions {
        PipelineOptions {
            display,
            settings: RendererSettings {
                max_preview: self.max_preview(),
                aspect_tolerance: self.aspect_tolerance,
            },
            render_mode: self.render_mode,
            frame_rate: self.frame_rate,
            open_timeout: self.camera_open_timeout(),
            threshold: clamp_threshold(self.threshold),
        }
    }
}
