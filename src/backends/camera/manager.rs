// SPDX-License-Identifier: GPL-3.0-only

//! Capture session manager
//!
//! Owns the one camera device and the one capture session of the pipeline.
//! Every transition (open, configure, close) holds the [`SessionPermit`];
//! opening and configuring complete asynchronously on the camera callback
//! thread, so the permit guard travels with the callback and is released
//! exactly once, whichever way the transition ends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::permit::{PermitGuard, PermitStats, SessionPermit};
use super::types::*;
use super::{
    CallbackHandler, CameraDeviceHandle, CameraDriver, CaptureSessionHandle, DeviceCallback,
    FrameSurface, find_rear_camera,
};
use crate::errors::{CameraError, CameraResult};
use crate::shaders::texture_transform;

/// Capture session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// Open requested, waiting for the device callback
    Opening,
    /// Device open, no session
    Open,
    /// Session requested, waiting for the configure callback
    Configuring,
    /// Repeating request streaming into the target surface
    Active,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Configuring => "configuring",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Called on the camera callback thread when an asynchronous step fails
pub type CameraErrorListener = Arc<dyn Fn(CameraError) + Send + Sync>;

/// Point-in-time view of the manager, for logs, the status bar and tests
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub camera_id: Option<String>,
    pub preview_size: Size,
    pub request: Option<CaptureRequest>,
    pub last_error: Option<CameraError>,
    pub permit: PermitStats,
}

struct SessionSlot {
    state: SessionState,
    /// Bumped by every open attempt and every close; callbacks carrying an
    /// older generation belong to an abandoned attempt
    generation: u64,
    camera: Option<CameraCharacteristics>,
    device: Option<Box<dyn CameraDeviceHandle>>,
    session: Option<Box<dyn CaptureSessionHandle>>,
    target: Option<Arc<FrameSurface>>,
    preview_size: Size,
    request: Option<CaptureRequest>,
    last_error: Option<CameraError>,
}

struct ManagerInner {
    driver: Arc<dyn CameraDriver>,
    handler: CallbackHandler,
    permit: SessionPermit,
    lock_timeout: Duration,
    slot: Mutex<SessionSlot>,
    error_listener: Mutex<Option<CameraErrorListener>>,
}

impl ManagerInner {
    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, err: CameraError) {
        let listener = self
            .error_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener(err);
        }
    }
}

/// Opens, configures and closes the rear camera
#[derive(Clone)]
pub struct CaptureSessionManager {
    inner: Arc<ManagerInner>,
}

impl CaptureSessionManager {
    /// # Arguments
    /// * `driver` - Camera stack to open devices from
    /// * `handler` - Queue of the camera callback thread
    /// * `lock_timeout` - Bound on the permit wait of `open_camera`
    pub fn new(
        driver: Arc<dyn CameraDriver>,
        handler: CallbackHandler,
        lock_timeout: Duration,
    ) -> Self {
        info!(driver = %driver.name(), "Creating capture session manager");
        Self {
            inner: Arc::new(ManagerInner {
                driver,
                handler,
                permit: SessionPermit::new(),
                lock_timeout,
                slot: Mutex::new(SessionSlot {
                    state: SessionState::Closed,
                    generation: 0,
                    camera: None,
                    device: None,
                    session: None,
                    target: None,
                    preview_size: Size::default(),
                    request: None,
                    last_error: None,
                }),
                error_listener: Mutex::new(None),
            }),
        }
    }

    pub fn set_error_listener(&self, listener: CameraErrorListener) {
        *self
            .inner
            .error_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn driver(&self) -> &Arc<dyn CameraDriver> {
        &self.inner.driver
    }

    pub fn handler(&self) -> &CallbackHandler {
        &self.inner.handler
    }

    pub fn permit_stats(&self) -> PermitStats {
        self.inner.permit.stats()
    }

    pub fn state(&self) -> SessionState {
        self.inner.slot().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let slot = self.inner.slot();
        SessionSnapshot {
            state: slot.state,
            camera_id: slot.camera.as_ref().map(|c| c.id.clone()),
            preview_size: slot.preview_size,
            request: slot.request.clone(),
            last_error: slot.last_error.clone(),
            permit: self.inner.permit.stats(),
        }
    }

    /// Wait until every callback posted so far has run
    pub fn flush_callbacks(&self, timeout: Duration) -> bool {
        self.inner.handler.flush(timeout)
    }

    /// Open the rear camera streaming `preview_size` images into `target`
    ///
    /// Returns once the open request is issued; the device and session come
    /// up later on the callback thread. Returns `Ok` without doing anything
    /// when a device is already open or opening.
    pub fn open_camera(&self, target: Arc<FrameSurface>, preview_size: Size) -> CameraResult<()> {
        let inner = &self.inner;

        if !inner.driver.has_camera_permission() {
            warn!("Camera permission not granted, not opening camera");
            inner.slot().last_error = Some(CameraError::PermissionDenied);
            return Err(CameraError::PermissionDenied);
        }

        {
            let slot = inner.slot();
            if slot.device.is_some() || slot.state != SessionState::Closed {
                debug!(state = %slot.state, "Camera already open, ignoring open request");
                return Ok(());
            }
        }

        let Some(guard) = inner.permit.try_acquire_for(inner.lock_timeout) else {
            error!(
                timeout_ms = inner.lock_timeout.as_millis() as u64,
                "Time out waiting to lock camera opening"
            );
            inner.slot().last_error = Some(CameraError::LockTimeout);
            return Err(CameraError::LockTimeout);
        };

        let camera = match find_rear_camera(inner.driver.as_ref()) {
            Ok(Some(camera)) => camera,
            Ok(None) => {
                error!("No rear-facing camera available");
                inner.slot().last_error = Some(CameraError::NoRearCamera);
                return Err(CameraError::NoRearCamera);
            }
            Err(e) => {
                error!(error = %e, "Camera enumeration failed");
                let err = CameraError::from(e);
                inner.slot().last_error = Some(err.clone());
                return Err(err);
            }
        };

        target.set_default_buffer_size(preview_size);
        target.set_transform(texture_transform(camera.sensor_orientation));

        let generation = {
            let mut slot = inner.slot();
            slot.generation += 1;
            slot.state = SessionState::Opening;
            slot.camera = Some(camera.clone());
            slot.target = Some(target);
            slot.preview_size = preview_size;
            slot.request = None;
            slot.last_error = None;
            slot.generation
        };

        info!(
            camera = %camera.id,
            facing = %camera.lens_facing,
            preview = %preview_size,
            "Opening camera"
        );

        // The first device event takes the guard; later events find it empty
        let open_guard = Arc::new(Mutex::new(Some(guard)));
        let callback: DeviceCallback = {
            let weak = Arc::downgrade(inner);
            let open_guard = Arc::clone(&open_guard);
            Arc::new(move |event| {
                let guard = open_guard
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                on_device_event(&weak, generation, event, guard);
            })
        };

        if let Err(e) = inner.driver.open(&camera.id, &inner.handler, callback) {
            error!(camera = %camera.id, error = %e, "Failed to open camera");
            drop(open_guard.lock().unwrap_or_else(PoisonError::into_inner).take());
            let err = CameraError::from(e);
            let mut slot = inner.slot();
            slot.state = SessionState::Closed;
            slot.camera = None;
            slot.target = None;
            slot.last_error = Some(err.clone());
            return Err(err);
        }

        Ok(())
    }

    /// Stop streaming and close session and device, in that order
    ///
    /// A no-op when nothing is open. An in-flight open or configure is
    /// waited for, however long its callback takes; must not be called from
    /// the camera callback thread.
    pub fn close_camera(&self) {
        let inner = &self.inner;

        let _guard = inner.permit.acquire();

        let (session, device) = {
            let mut slot = inner.slot();
            if slot.state == SessionState::Closed && slot.device.is_none() && slot.session.is_none()
            {
                debug!("close_camera: nothing open");
                return;
            }
            slot.generation += 1;
            slot.state = SessionState::Closing;
            (slot.session.take(), slot.device.take())
        };

        debug!("Closing camera");

        if let Some(mut session) = session {
            if let Err(e) = session.stop_repeating() {
                warn!(error = %e, "stop_repeating failed");
            }
            if let Err(e) = session.abort_captures() {
                warn!(error = %e, "abort_captures failed");
            }
            session.close();
        }
        if let Some(mut device) = device {
            device.close();
        }

        let mut slot = inner.slot();
        slot.state = SessionState::Closed;
        slot.target = None;
        slot.request = None;
        info!("Camera closed");
    }
}

impl std::fmt::Debug for CaptureSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSessionManager")
            .field("driver", &self.inner.driver.name())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

fn on_device_event(
    weak: &Weak<ManagerInner>,
    generation: u64,
    event: DeviceEvent,
    open_guard: Option<PermitGuard>,
) {
    let Some(inner) = weak.upgrade() else {
        if let DeviceEvent::Opened(mut device) = event {
            device.close();
        }
        return;
    };

    match event {
        DeviceEvent::Opened(device) => {
            debug!(camera = %device.id(), "Camera opened");
            drop(open_guard);
            create_preview_session(&inner, generation, device);
        }
        DeviceEvent::Disconnected => {
            drop(open_guard);
            warn!("Camera disconnected");
            if tear_down_after_failure(&inner, generation, CameraError::Disconnected) {
                inner.report(CameraError::Disconnected);
            }
        }
        DeviceEvent::Error(code) => {
            drop(open_guard);
            error!(code, "Camera device error");
            let err = CameraError::DeviceError(code);
            if tear_down_after_failure(&inner, generation, err.clone()) {
                inner.report(err);
            }
        }
    }
}

/// Close and forget device and session after a disconnect/error callback.
/// Returns false if the callback belonged to an abandoned attempt.
fn tear_down_after_failure(inner: &ManagerInner, generation: u64, err: CameraError) -> bool {
    let (session, device) = {
        let mut slot = inner.slot();
        if slot.generation != generation {
            return false;
        }
        slot.state = SessionState::Closed;
        slot.target = None;
        slot.request = None;
        slot.last_error = Some(err);
        (slot.session.take(), slot.device.take())
    };
    if let Some(mut session) = session {
        session.close();
    }
    if let Some(mut device) = device {
        device.close();
    }
    true
}

fn create_preview_session(
    inner: &Arc<ManagerInner>,
    generation: u64,
    mut device: Box<dyn CameraDeviceHandle>,
) {
    // A close racing this callback takes the permit first and orphans the
    // attempt; the generation check below then closes the late device
    let guard = inner.permit.acquire();

    let mut slot = inner.slot();
    if slot.generation != generation {
        debug!("Camera was closed while opening, closing late device");
        drop(slot);
        device.close();
        return;
    }

    let Some(target) = slot.target.clone() else {
        error!("Preview surface is gone, cannot create capture session");
        slot.state = SessionState::Open;
        slot.device = Some(device);
        return;
    };

    slot.state = SessionState::Configuring;

    let weak = Arc::downgrade(inner);
    let callback = Box::new(move |event: SessionEvent| {
        on_session_event(&weak, generation, event, guard);
    });

    // Drivers post the outcome, so holding the slot lock here cannot re-enter
    match device.create_capture_session(target, &inner.handler, callback) {
        Ok(()) => {
            slot.device = Some(device);
        }
        Err(e) => {
            error!(error = %e, "Failed to create capture session");
            let err = CameraError::ConfigureFailed(e.to_string());
            slot.state = SessionState::Open;
            slot.device = Some(device);
            slot.last_error = Some(err.clone());
            drop(slot);
            inner.report(err);
        }
    }
}

fn on_session_event(
    weak: &Weak<ManagerInner>,
    generation: u64,
    event: SessionEvent,
    guard: PermitGuard,
) {
    let Some(inner) = weak.upgrade() else {
        if let SessionEvent::Configured(mut session) = event {
            session.close();
        }
        return;
    };

    match event {
        SessionEvent::Configured(mut session) => {
            let mut slot = inner.slot();
            if slot.generation != generation || slot.device.is_none() {
                // The camera is already closed
                drop(slot);
                session.close();
                drop(guard);
                return;
            }

            let request = CaptureRequest::preview(slot.preview_size);
            match session.set_repeating_request(&request) {
                Ok(()) => {
                    info!(preview = %request.target_size, "Capture session active");
                    slot.state = SessionState::Active;
                    slot.session = Some(session);
                    slot.request = Some(request);
                    drop(slot);
                    drop(guard);
                }
                Err(e) => {
                    error!(error = %e, "Failed to start repeating request");
                    let err = CameraError::ConfigureFailed(e.to_string());
                    slot.state = SessionState::Open;
                    slot.last_error = Some(err.clone());
                    drop(slot);
                    session.close();
                    drop(guard);
                    inner.report(err);
                }
            }
        }
        SessionEvent::ConfigureFailed(message) => {
            error!(message = %message, "Capture session configuration failed");
            let err = CameraError::ConfigureFailed(message);
            let current = {
                let mut slot = inner.slot();
                let current = slot.generation == generation;
                if current {
                    slot.state = SessionState::Open;
                    slot.last_error = Some(err.clone());
                }
                current
            };
            drop(guard);
            if current {
                inner.report(err);
            }
        }
    }
}
