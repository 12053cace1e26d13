// SPDX-License-Identifier: MPL-2.0

//! Error types for the frame pipeline

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result of a camera session operation
pub type CameraResult<T> = Result<T, CameraError>;

/// Result of a GPU operation
pub type RenderResult<T> = Result<T, RenderError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Camera-related errors
    Camera(CameraError),
    /// GPU/rendering errors
    Render(RenderError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Io(String),
    /// Generic error with message
    Other(String),
}

/// Camera session errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The camera permission has not been granted
    PermissionDenied,
    /// No device reports a non-front lens facing
    NoRearCamera,
    /// Negotiation found no usable preview size
    NoPreviewSize,
    /// The session permit could not be acquired in time
    LockTimeout,
    /// The driver refused access to the device
    AccessFailed(String),
    /// The device went away while open
    Disconnected,
    /// The device reported an error code
    DeviceError(i32),
    /// The capture session could not be configured
    ConfigureFailed(String),
}

/// GPU and render errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A shader program failed to compile or link
    ShaderCompile { program: String, message: String },
    /// A shader program is missing a required attribute/uniform/sampler name
    ShaderContract { program: String, missing: String },
    /// Framebuffer is not complete
    FramebufferIncomplete(String),
    /// A handle does not refer to a live resource
    InvalidHandle(String),
    /// Device creation or submission failed
    Device(String),
    /// Reading a texture back to the CPU failed
    Readback(String),
}

/// Error taxonomy used when reporting failures to the control layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Recoverable, the pipeline does not start until granted
    Permission,
    /// Retried on the next surface size change
    Negotiation,
    /// Fatal for the current attempt
    DeviceAccess,
    /// Device lost while running, no automatic reopen
    Disconnect,
    /// GPU failures
    Render,
    Other,
}

impl CameraError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CameraError::PermissionDenied => ErrorCategory::Permission,
            CameraError::NoPreviewSize => ErrorCategory::Negotiation,
            CameraError::NoRearCamera
            | CameraError::LockTimeout
            | CameraError::AccessFailed(_)
            | CameraError::ConfigureFailed(_) => ErrorCategory::DeviceAccess,
            CameraError::Disconnected | CameraError::DeviceError(_) => ErrorCategory::Disconnect,
        }
    }
}

impl RenderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RenderError::FramebufferIncomplete(_) => ErrorCategory::Negotiation,
            _ => ErrorCategory::Render,
        }
    }
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Camera(e) => e.category(),
            AppError::Render(e) => e.category(),
            _ => ErrorCategory::Other,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Render(e) => write!(f, "Render error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(msg) => write!(f, "I/O error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::PermissionDenied => write!(f, "Camera permission not granted"),
            CameraError::NoRearCamera => write!(f, "No rear-facing camera found"),
            CameraError::NoPreviewSize => write!(f, "No supported preview size fits the limits"),
            CameraError::LockTimeout => write!(f, "Timed out waiting to lock camera opening"),
            CameraError::AccessFailed(msg) => write!(f, "Camera access failed: {}", msg),
            CameraError::Disconnected => write!(f, "Camera disconnected"),
            CameraError::DeviceError(code) => write!(f, "Camera device error {}", code),
            CameraError::ConfigureFailed(msg) => {
                write!(f, "Capture session configuration failed: {}", msg)
            }
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::ShaderCompile { program, message } => {
                write!(f, "Failed to compile program '{}': {}", program, message)
            }
            RenderError::ShaderContract { program, missing } => {
                write!(f, "Program '{}' does not declare '{}'", program, missing)
            }
            RenderError::FramebufferIncomplete(msg) => write!(f, "Framebuffer incomplete: {}", msg),
            RenderError::InvalidHandle(msg) => write!(f, "Invalid handle: {}", msg),
            RenderError::Device(msg) => write!(f, "GPU device error: {}", msg),
            RenderError::Readback(msg) => write!(f, "GPU readback failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CameraError {}
impl std::error::Error for RenderError {}

// Conversions from sub-errors to AppError
impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err)
    }
}

impl From<crate::backends::camera::BackendError> for AppError {
    fn from(err: crate::backends::camera::BackendError) -> Self {
        AppError::Camera(err.into())
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
