// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic camera driver
//!
//! Produces a moving test pattern, so the whole pipeline can run without
//! camera hardware. By default it exposes a back camera "0" and a front
//! camera "1", mirroring a typical phone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::frame_loop::{CaptureLoopController, FramePacer, LoopAction};
use super::types::*;
use super::{
    CallbackHandler, CameraDeviceHandle, CameraDriver, CaptureSessionHandle, DeviceCallback,
    FrameSurface, SessionCallback,
};
use crate::constants::threads;

/// Description of one synthetic camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticCamera {
    pub id: String,
    pub lens_facing: LensFacing,
    pub sensor_orientation: SensorRotation,
    pub flash_available: bool,
    pub output_sizes: Vec<Size>,
}

impl SyntheticCamera {
    pub fn back(id: &str) -> Self {
        Self {
            id: id.to_string(),
            lens_facing: LensFacing::Back,
            sensor_orientation: SensorRotation::None,
            flash_available: true,
            output_sizes: vec![
                Size::new(4000, 3000),
                Size::new(1920, 1080),
                Size::new(1280, 720),
                Size::new(960, 540),
                Size::new(640, 480),
                Size::new(320, 240),
            ],
        }
    }

    pub fn front(id: &str) -> Self {
        Self {
            id: id.to_string(),
            lens_facing: LensFacing::Front,
            sensor_orientation: SensorRotation::None,
            flash_available: false,
            output_sizes: vec![Size::new(1280, 720), Size::new(640, 480)],
        }
    }

    fn characteristics(&self) -> CameraCharacteristics {
        CameraCharacteristics {
            id: self.id.clone(),
            name: format!("Synthetic {} camera", self.lens_facing),
            lens_facing: self.lens_facing,
            sensor_orientation: self.sensor_orientation,
            flash_available: self.flash_available,
            output_sizes: self.output_sizes.clone(),
        }
    }
}

pub struct SyntheticDriver {
    cameras: Vec<SyntheticCamera>,
    permission: AtomicBool,
    frame_rate: u32,
}

impl Default for SyntheticDriver {
    fn default() -> Self {
        Self::new(
            vec![SyntheticCamera::back("0"), SyntheticCamera::front("1")],
            crate::constants::DEFAULT_FRAME_RATE,
        )
    }
}

impl SyntheticDriver {
    pub fn new(cameras: Vec<SyntheticCamera>, frame_rate: u32) -> Self {
        Self {
            cameras,
            permission: AtomicBool::new(true),
            frame_rate: frame_rate.max(1),
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate.max(1);
        self
    }

    /// Simulate granting or revoking the camera permission
    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    fn camera(&self, camera_id: &str) -> BackendResult<&SyntheticCamera> {
        self.cameras
            .iter()
            .find(|c| c.id == camera_id)
            .ok_or_else(|| BackendError::DeviceNotFound(camera_id.to_string()))
    }
}

impl CameraDriver for SyntheticDriver {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn camera_ids(&self) -> BackendResult<Vec<String>> {
        Ok(self.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, camera_id: &str) -> BackendResult<CameraCharacteristics> {
        Ok(self.camera(camera_id)?.characteristics())
    }

    fn has_camera_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn open(
        &self,
        camera_id: &str,
        handler: &CallbackHandler,
        callback: DeviceCallback,
    ) -> BackendResult<()> {
        let camera = self.camera(camera_id)?;
        if !self.has_camera_permission() {
            return Err(BackendError::AccessDenied("camera permission revoked".into()));
        }

        info!(camera = %camera.id, "Opening synthetic camera");
        let device = SyntheticDevice {
            id: camera.id.clone(),
            frame_rate: self.frame_rate,
            closed: false,
        };
        let posted = handler.post(move || callback(DeviceEvent::Opened(Box::new(device))));
        if posted {
            Ok(())
        } else {
            Err(BackendError::NotAvailable("callback thread stopped".into()))
        }
    }
}

struct SyntheticDevice {
    id: String,
    frame_rate: u32,
    closed: bool,
}

impl CameraDeviceHandle for SyntheticDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        target: Arc<FrameSurface>,
        handler: &CallbackHandler,
        callback: SessionCallback,
    ) -> BackendResult<()> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        let session = SyntheticSession {
            target,
            frame_rate: self.frame_rate,
            stream: None,
        };
        handler.post(move || callback(SessionEvent::Configured(Box::new(session))));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(camera = %self.id, "Synthetic camera closed");
            self.closed = true;
        }
    }
}

struct SyntheticStream {
    controller: CaptureLoopController,
    wake: Arc<AtomicBool>,
}

struct SyntheticSession {
    target: Arc<FrameSurface>,
    frame_rate: u32,
    stream: Option<SyntheticStream>,
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        let _ = self.stop_repeating();
    }
}

impl CaptureSessionHandle for SyntheticSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> BackendResult<()> {
        self.stop_repeating()?;

        let target = Arc::clone(&self.target);
        let size = if request.target_size.is_empty() {
            target.default_buffer_size()
        } else {
            request.target_size
        };
        if size.is_empty() {
            return Err(BackendError::FormatNotSupported(format!("{}", size)));
        }

        let frame_rate = self.frame_rate;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop_flag);
        let mut pacer = FramePacer::new(frame_rate);
        let mut sequence = 0u64;

        let controller = CaptureLoopController::start(threads::SYNTHETIC_STREAM, move || {
            if !pacer.wait(&loop_stop) {
                return LoopAction::Stop;
            }
            let pixels = render_test_pattern(size, sequence);
            let Some(image) = CameraImage::from_rgba(size, pixels, sequence) else {
                return LoopAction::Stop;
            };
            sequence += 1;
            if target.queue_frame(image) {
                LoopAction::Continue
            } else {
                LoopAction::Stop
            }
        })?;
        debug!(%size, fps = frame_rate, "Synthetic repeating request started");
        self.stream = Some(SyntheticStream {
            controller,
            wake: stop_flag,
        });
        Ok(())
    }

    fn stop_repeating(&mut self) -> BackendResult<()> {
        if let Some(mut stream) = self.stream.take() {
            // Wake the pacer first so the join below does not wait a tick
            stream.wake.store(true, Ordering::SeqCst);
            stream.controller.stop();
        }
        Ok(())
    }

    fn abort_captures(&mut self) -> BackendResult<()> {
        // Frames are produced synchronously; nothing is ever in flight
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stop_repeating();
    }
}

/// Paint a frame of the test pattern: vertical color bars with a white
/// square sweeping across, so edges move every frame
pub fn render_test_pattern(size: Size, sequence: u64) -> Vec<u8> {
    const BARS: [[u8; 3]; 8] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
        [16, 16, 16],
    ];

    let (w, h) = (size.width as usize, size.height as usize);
    let square = (h / 4).max(1);
    let travel = w.saturating_sub(square).max(1);
    let square_x = (sequence as usize * 4) % travel;
    let square_y = h.saturating_sub(square) / 2;

    let mut data = Vec::with_capacity(size.rgba_len());
    for y in 0..h {
        for x in 0..w {
            let in_square = (square_x..square_x + square).contains(&x)
                && (square_y..square_y + square).contains(&y);
            let rgb = if in_square {
                [255, 255, 255]
            } else {
                BARS[x * BARS.len() / w.max(1)]
            };
            data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::HandlerThread;
    use std::sync::{Mutex, PoisonError};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_default_cameras() {
        let driver = SyntheticDriver::default();
        assert_eq!(driver.camera_ids().unwrap(), vec!["0", "1"]);
        let back = driver.characteristics("0").unwrap();
        assert_eq!(back.lens_facing, LensFacing::Back);
        assert!(back.output_sizes.contains(&Size::new(1920, 1080)));
        assert!(driver.characteristics("9").is_err());
    }

    #[test]
    fn test_open_without_permission_fails() {
        let driver = SyntheticDriver::default();
        driver.set_permission(false);
        let thread = HandlerThread::start("test-callbacks").unwrap();
        let result = driver.open("0", &thread.handler(), Arc::new(|_| {}));
        assert!(matches!(result, Err(BackendError::AccessDenied(_))));
    }

    #[test]
    fn test_stream_reaches_surface() {
        let driver = SyntheticDriver::new(vec![SyntheticCamera::back("0")], 200);
        let thread = HandlerThread::start("test-callbacks").unwrap();
        let handler = thread.handler();

        let (device_tx, device_rx) = mpsc::channel();
        let device_tx = Mutex::new(device_tx);
        driver
            .open(
                "0",
                &handler,
                Arc::new(move |event| {
                    if let DeviceEvent::Opened(device) = event {
                        let _ = device_tx
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .send(device);
                    }
                }),
            )
            .unwrap();
        let mut device = device_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(device.id(), "0");

        let surface = Arc::new(FrameSurface::new(crate::gpu::TextureHandle(1)));
        surface.set_default_buffer_size(Size::new(8, 6));
        let (frame_tx, frame_rx) = mpsc::channel();
        let frame_tx = Mutex::new(frame_tx);
        surface.set_on_frame_available(Arc::new(move || {
            let _ = frame_tx.lock().unwrap_or_else(PoisonError::into_inner).send(());
        }));

        let (session_tx, session_rx) = mpsc::channel();
        device
            .create_capture_session(
                Arc::clone(&surface),
                &handler,
                Box::new(move |event| {
                    let _ = session_tx.send(event);
                }),
            )
            .unwrap();
        let SessionEvent::Configured(mut session) =
            session_rx.recv_timeout(Duration::from_secs(2)).unwrap()
        else {
            panic!("session was not configured");
        };

        session
            .set_repeating_request(&CaptureRequest::preview(Size::new(8, 6)))
            .unwrap();
        frame_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        session.stop_repeating().unwrap();
        let queued = surface.stats().queued;
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(surface.stats().queued, queued);

        session.close();
        device.close();
        assert!(matches!(
            device.create_capture_session(surface, &handler, Box::new(|_| {})),
            Err(BackendError::Closed)
        ));
    }

    #[test]
    fn test_pattern_moves() {
        let size = Size::new(64, 32);
        let first = render_test_pattern(size, 0);
        let later = render_test_pattern(size, 3);
        assert_eq!(first.len(), size.rgba_len());
        assert_ne!(first, later);
    }
}
