// SPDX-License-Identifier: MPL-2.0

//! Camera drivers and the capture session manager
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Renderer (GPU thread)│  open_camera / close_camera
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐     callbacks      ┌──────────────────┐
//! │CaptureSessionManager │◄───────────────────│  HandlerThread    │
//! └──────────┬───────────┘   (posted jobs)    │ "CameraBackground"│
//!            │                                └──────────────────┘
//!            ▼
//! ┌──────────────────────┐
//! │  CameraDriver trait  │  ← enumeration, characteristics, async open
//! └──────────┬───────────┘
//!            │
//!       ┌────┴─────┐
//!       ▼          ▼
//!  ┌─────────┐ ┌──────┐
//!  │Synthetic│ │ V4L2 │  ── stream thread ──► FrameSurface
//!  └─────────┘ └──────┘
//! ```
//!
//! Drivers never call a callback inline from the method that triggered it:
//! device and session callbacks are always posted to the
//! [`CallbackHandler`] passed in, so they run on the camera callback thread
//! in order.

pub mod frame_loop;
pub mod handler;
pub mod manager;
pub mod permit;
pub mod surface;
pub mod synthetic;
pub mod types;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use handler::{CallbackHandler, HandlerThread};
pub use manager::{CaptureSessionManager, SessionSnapshot, SessionState};
pub use permit::{PermitGuard, PermitStats, SessionPermit};
pub use surface::{FrameAvailableListener, FrameSurface, SurfaceStats};
pub use synthetic::{SyntheticCamera, SyntheticDriver};
pub use types::*;

use std::sync::Arc;

/// Receives every state change of one opened device
pub type DeviceCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Receives the outcome of one capture session configuration
pub type SessionCallback = Box<dyn FnOnce(SessionEvent) + Send>;

/// Entry point of a camera stack
pub trait CameraDriver: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Ids of all cameras, in the driver's enumeration order
    fn camera_ids(&self) -> BackendResult<Vec<String>>;

    fn characteristics(&self, camera_id: &str) -> BackendResult<CameraCharacteristics>;

    /// Whether the process may open cameras
    fn has_camera_permission(&self) -> bool;

    /// Start opening a camera
    ///
    /// Returns once the request is accepted. The outcome
    /// ([`DeviceEvent::Opened`] or [`DeviceEvent::Error`]) and any later
    /// [`DeviceEvent::Disconnected`] are posted to `handler`.
    fn open(
        &self,
        camera_id: &str,
        handler: &CallbackHandler,
        callback: DeviceCallback,
    ) -> BackendResult<()>;
}

/// An opened camera device
pub trait CameraDeviceHandle: Send {
    fn id(&self) -> &str;

    /// Start configuring a session streaming into `target`
    ///
    /// The outcome is posted to `handler`. Images are produced only after a
    /// repeating request is set on the configured session.
    fn create_capture_session(
        &mut self,
        target: Arc<FrameSurface>,
        handler: &CallbackHandler,
        callback: SessionCallback,
    ) -> BackendResult<()>;

    /// Close the device. Idempotent.
    fn close(&mut self);
}

/// A configured capture session
pub trait CaptureSessionHandle: Send {
    /// Start (or replace) the request streamed for every frame
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> BackendResult<()>;

    fn stop_repeating(&mut self) -> BackendResult<()>;

    /// Discard captures in flight
    fn abort_captures(&mut self) -> BackendResult<()>;

    /// Close the session. Idempotent.
    fn close(&mut self);
}

/// Create the driver selected in the config
///
/// `synthetic_fps` is the frame rate of the synthetic camera and is ignored
/// by the other drivers.
pub fn create_driver(
    backend: CameraBackendType,
    synthetic_fps: u32,
) -> BackendResult<Arc<dyn CameraDriver>> {
    match backend {
        CameraBackendType::Synthetic => Ok(Arc::new(
            SyntheticDriver::default().with_frame_rate(synthetic_fps),
        )),
        #[cfg(feature = "v4l2")]
        CameraBackendType::V4l2 => Ok(Arc::new(v4l2::V4l2Driver::new())),
        #[cfg(not(feature = "v4l2"))]
        CameraBackendType::V4l2 => Err(BackendError::NotAvailable(
            "built without the v4l2 feature".to_string(),
        )),
    }
}

/// First camera whose lens does not face the user
pub fn find_rear_camera(driver: &dyn CameraDriver) -> BackendResult<Option<CameraCharacteristics>> {
    for id in driver.camera_ids()? {
        let characteristics = driver.characteristics(&id)?;
        if characteristics.lens_facing != LensFacing::Front {
            return Ok(Some(characteristics));
        }
    }
    Ok(None)
}
