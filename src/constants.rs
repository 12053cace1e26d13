// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest preview width every camera driver is guaranteed to stream
pub const MAX_PREVIEW_WIDTH: u32 = 1920;

/// Largest preview height every camera driver is guaranteed to stream
pub const MAX_PREVIEW_HEIGHT: u32 = 1080;

/// Maximum relative error between the screen and a camera size aspect ratio
pub const ASPECT_RATIO_TOLERANCE: f64 = 0.01;

/// How long `open_camera` waits for the session permit before giving up
pub const CAMERA_OPEN_TIMEOUT: Duration = Duration::from_millis(2500);

/// Threshold handed to the frame processor is clamped into this range
pub const THRESHOLD_MIN: i32 = 0;
pub const THRESHOLD_MAX: i32 = 255;
pub const THRESHOLD_DEFAULT: i32 = 80;

/// Default redraw rate of the render thread in continuous mode
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Thread names, visible in debuggers and `top -H`
pub mod threads {
    pub const CAMERA_CALLBACKS: &str = "CameraBackground";
    pub const RENDER: &str = "edgecam-render";
    pub const SYNTHETIC_STREAM: &str = "synthetic-stream";
    pub const V4L2_STREAM: &str = "v4l2-stream";
}

/// Names the shader programs must expose
///
/// The renderer binds vertex data and uniforms by these names, so both the
/// camera program and the 2-D program have to declare them.
pub mod shader_names {
    /// Vertex attribute holding clip-space quad corners
    pub const POSITION: &str = "position";
    /// Vertex attribute holding texture coordinates
    pub const TEXTURE_POSITION: &str = "texturePosition";
    /// Per-frame transform of the camera image
    pub const CAMERA_TEXTURE_MATRIX: &str = "cameraTextureMatrix";
    pub const MVP_MATRIX: &str = "mvpMatrix";
    /// Sampled texture in the camera program
    pub const CAMERA_TEXTURE: &str = "cameraTexture";
    /// Sampled texture in the 2-D program
    pub const SAMPLER_2D_TEXTURE: &str = "sampler2DTexture";
}

/// When the render thread redraws
///
/// `Continuous` redraws at the configured frame rate whether or not a camera
/// frame arrived. `WhenDirty` only redraws after a frame-available signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    #[default]
    Continuous,
    WhenDirty,
}

impl RenderMode {
    pub const ALL: [RenderMode; 2] = [RenderMode::Continuous, RenderMode::WhenDirty];

    /// Get display name for the mode
    pub fn display_name(&self) -> &'static str {
        match self {
            RenderMode::Continuous => "Continuous",
            RenderMode::WhenDirty => "When dirty",
        }
    }
}

/// Clamp a user supplied threshold into the processor range
pub fn clamp_threshold(value: i32) -> i32 {
    value.clamp(THRESHOLD_MIN, THRESHOLD_MAX)
}
