// SPDX-License-Identifier: MPL-2.0

//! Shared types for camera drivers and the capture session manager

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::{CameraDeviceHandle, CaptureSessionHandle};

/// Camera driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendType {
    /// Built-in test pattern camera, always available
    #[default]
    Synthetic,
    /// Video4Linux devices under /dev/video*
    V4l2,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::Synthetic => write!(f, "synthetic"),
            CameraBackendType::V4l2 => write!(f, "v4l2"),
        }
    }
}

impl std::str::FromStr for CameraBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "synthetic" => Ok(CameraBackendType::Synthetic),
            "v4l2" => Ok(CameraBackendType::V4l2),
            other => Err(format!("unknown camera backend '{}'", other)),
        }
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Long side over short side, so portrait and landscape sizes compare equal
    pub fn aspect_ratio(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let long = self.width.max(self.height) as f64;
        let short = self.width.min(self.height) as f64;
        long / short
    }

    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn fits_within(&self, max: Size) -> bool {
        self.width <= max.width && self.height <= max.height
    }

    /// Per-axis minimum
    pub fn min(&self, other: Size) -> Self {
        Self::new(self.width.min(other.width), self.height.min(other.height))
    }

    /// Byte length of a tightly packed RGBA8 image of this size
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w.trim().parse().map_err(|_| format!("bad width in '{}'", s))?;
        let height = h.trim().parse().map_err(|_| format!("bad height in '{}'", s))?;
        Ok(Size::new(width, height))
    }
}

/// Direction the lens points relative to the device screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LensFacing {
    Back,
    Front,
    /// Detachable camera (USB webcams)
    External,
}

impl std::fmt::Display for LensFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensFacing::Back => write!(f, "back"),
            LensFacing::Front => write!(f, "front"),
            LensFacing::External => write!(f, "external"),
        }
    }
}

/// Rotation in degrees (clockwise)
///
/// Used both for how a sensor is mounted relative to the device's natural
/// orientation and for the current rotation of the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

/// Rotation of the display, same representation as sensor mounting
pub type DisplayRotation = SensorRotation;

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees_int(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }

    /// Whether a sensor at this rotation produces images whose axes are
    /// swapped relative to a display at `display` rotation
    pub fn swaps_relative_to(&self, display: DisplayRotation) -> bool {
        self.swaps_dimensions() != display.swaps_dimensions()
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Screen properties read once per negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMetrics {
    pub size: Size,
    pub rotation: DisplayRotation,
}

impl DisplayMetrics {
    pub fn new(size: Size, rotation: DisplayRotation) -> Self {
        Self { size, rotation }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.size.aspect_ratio()
    }
}

/// Static properties of one camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCharacteristics {
    pub id: String,
    /// Human readable name (V4L2 card name, etc.)
    pub name: String,
    pub lens_facing: LensFacing,
    pub sensor_orientation: SensorRotation,
    pub flash_available: bool,
    /// Sizes the device can stream into a GPU surface
    pub output_sizes: Vec<Size>,
}

/// Autofocus mode of a capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfMode {
    Off,
    Auto,
    ContinuousVideo,
    ContinuousPicture,
}

/// Auto-exposure mode of a capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
    OnAlwaysFlash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    Single,
    Torch,
}

/// Settings applied to every frame of a repeating capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub target_size: Size,
    pub af_mode: AfMode,
    pub ae_mode: AeMode,
    pub flash_mode: FlashMode,
}

impl CaptureRequest {
    /// Preview request: continuous-picture AF, AE on, flash off.
    ///
    /// The flash stays off whether or not the device has one.
    pub fn preview(target_size: Size) -> Self {
        Self {
            target_size,
            af_mode: AfMode::ContinuousPicture,
            ae_mode: AeMode::On,
            flash_mode: FlashMode::Off,
        }
    }
}

/// One RGBA8 image delivered by a driver
#[derive(Debug, Clone)]
pub struct CameraImage {
    pub size: Size,
    /// Tightly packed RGBA8 rows, `size.rgba_len()` bytes
    pub data: Arc<[u8]>,
    /// Monotonic counter assigned by the driver
    pub sequence: u64,
    pub captured_at: Instant,
}

impl CameraImage {
    /// Wrap RGBA8 bytes, or `None` if the length does not match `size`
    pub fn from_rgba(size: Size, data: Vec<u8>, sequence: u64) -> Option<Self> {
        if data.len() != size.rgba_len() || size.is_empty() {
            return None;
        }
        Some(Self {
            size,
            data: Arc::from(data),
            sequence,
            captured_at: Instant::now(),
        })
    }
}

/// Device error codes reported through [`DeviceEvent::Error`]
pub mod device_error {
    pub const CAMERA_IN_USE: i32 = 1;
    pub const MAX_CAMERAS_IN_USE: i32 = 2;
    pub const CAMERA_DISABLED: i32 = 3;
    pub const CAMERA_DEVICE: i32 = 4;
    pub const CAMERA_SERVICE: i32 = 5;
}

/// State changes of a camera device, delivered on the callback thread
pub enum DeviceEvent {
    Opened(Box<dyn CameraDeviceHandle>),
    Disconnected,
    Error(i32),
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::Disconnected => write!(f, "Disconnected"),
            DeviceEvent::Error(code) => write!(f, "Error({})", code),
        }
    }
}

/// Outcome of capture session configuration, delivered on the callback thread
pub enum SessionEvent {
    Configured(Box<dyn CaptureSessionHandle>),
    ConfigureFailed(String),
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Configured(_) => write!(f, "Configured"),
            SessionEvent::ConfigureFailed(msg) => write!(f, "ConfigureFailed({})", msg),
        }
    }
}

/// Error types for driver operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Format not supported
    FormatNotSupported(String),
    /// Device refused access (busy, permissions)
    AccessDenied(String),
    /// Operation on a closed device or session
    Closed,
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            BackendError::Closed => write!(f, "Device or session already closed"),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

impl From<BackendError> for crate::errors::CameraError {
    fn from(err: BackendError) -> Self {
        crate::errors::CameraError::AccessFailed(err.to_string())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
