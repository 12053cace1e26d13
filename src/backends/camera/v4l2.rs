// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture driver
//!
//! Every `/dev/video*` node with the video capture capability is one camera,
//! identified by its path. Sessions stream YUYV through memory-mapped buffers
//! on a dedicated thread and convert each frame to RGBA before queuing it.
//! Webcams carry no lens facing information, so every camera reports
//! [`LensFacing::External`].

use std::sync::Arc;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::*;
use super::{
    CallbackHandler, CameraDeviceHandle, CameraDriver, CaptureSessionHandle, DeviceCallback,
    FrameSurface, SessionCallback,
};
use crate::constants::threads;

const YUYV: &[u8; 4] = b"YUYV";
const BUFFER_COUNT: u32 = 4;

/// Sizes probed inside a stepwise frame size range
const STEPWISE_CANDIDATES: [(u32, u32); 6] = [
    (1920, 1080),
    (1280, 720),
    (1024, 768),
    (800, 600),
    (640, 480),
    (320, 240),
];

pub struct V4l2Driver {
    device_dir: String,
}

impl Default for V4l2Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Driver {
    pub fn new() -> Self {
        Self {
            device_dir: "/dev".to_string(),
        }
    }

    fn capture_nodes(&self) -> BackendResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.device_dir)?;
        let mut nodes: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.starts_with("video")
                    .then(|| format!("{}/{}", self.device_dir, name))
            })
            .filter(|path| is_capture_node(path))
            .collect();
        nodes.sort_by_key(|path| video_index(path));
        Ok(nodes)
    }
}

fn video_index(path: &str) -> u32 {
    path.rsplit("video")
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

fn is_capture_node(path: &str) -> bool {
    let Ok(dev) = Device::with_path(path) else {
        return false;
    };
    match dev.query_caps() {
        Ok(caps) => caps.capabilities.contains(Flags::VIDEO_CAPTURE),
        Err(_) => false,
    }
}

/// Frame sizes the node offers in YUYV, largest first
fn yuyv_sizes(dev: &Device) -> Vec<Size> {
    let mut sizes = Vec::new();
    let Ok(frame_sizes) = dev.enum_framesizes(FourCC::new(YUYV)) else {
        return sizes;
    };
    for frame_size in frame_sizes {
        match frame_size.size {
            FrameSizeEnum::Discrete(discrete) => {
                sizes.push(Size::new(discrete.width, discrete.height));
            }
            FrameSizeEnum::Stepwise(step) => {
                for (w, h) in STEPWISE_CANDIDATES {
                    if (step.min_width..=step.max_width).contains(&w)
                        && (step.min_height..=step.max_height).contains(&h)
                    {
                        sizes.push(Size::new(w, h));
                    }
                }
            }
        }
    }
    sizes.sort_by_key(|s| std::cmp::Reverse(s.area()));
    sizes.dedup();
    sizes
}

impl CameraDriver for V4l2Driver {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn camera_ids(&self) -> BackendResult<Vec<String>> {
        self.capture_nodes()
    }

    fn characteristics(&self, camera_id: &str) -> BackendResult<CameraCharacteristics> {
        let dev = Device::with_path(camera_id)
            .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", camera_id, e)))?;
        let caps = dev.query_caps()?;
        Ok(CameraCharacteristics {
            id: camera_id.to_string(),
            name: caps.card,
            lens_facing: LensFacing::External,
            sensor_orientation: SensorRotation::None,
            flash_available: false,
            output_sizes: yuyv_sizes(&dev),
        })
    }

    fn has_camera_permission(&self) -> bool {
        // Access is decided per node when it is opened
        true
    }

    fn open(
        &self,
        camera_id: &str,
        handler: &CallbackHandler,
        callback: DeviceCallback,
    ) -> BackendResult<()> {
        info!(path = %camera_id, "Opening V4L2 camera");
        let id = camera_id.to_string();
        let event_handler = handler.clone();
        let posted = handler.post(move || match Device::with_path(&id) {
            Ok(_) => {
                let device = V4l2Device {
                    path: id,
                    callback: Arc::clone(&callback),
                    handler: event_handler,
                    closed: false,
                };
                callback(DeviceEvent::Opened(Box::new(device)));
            }
            Err(e) => {
                warn!(path = %id, error = %e, "Failed to open V4L2 camera");
                let code = if e.kind() == std::io::ErrorKind::ResourceBusy {
                    device_error::CAMERA_IN_USE
                } else {
                    device_error::CAMERA_DEVICE
                };
                callback(DeviceEvent::Error(code));
            }
        });
        if posted {
            Ok(())
        } else {
            Err(BackendError::NotAvailable("callback thread stopped".into()))
        }
    }
}

struct V4l2Device {
    path: String,
    callback: DeviceCallback,
    handler: CallbackHandler,
    closed: bool,
}

impl CameraDeviceHandle for V4l2Device {
    fn id(&self) -> &str {
        &self.path
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
        let session = V4l2Session {
            path: self.path.clone(),
            target,
            device_callback: Arc::clone(&self.callback),
            handler: self.handler.clone(),
            stream: None,
        };
        handler.post(move || callback(SessionEvent::Configured(Box::new(session))));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(path = %self.path, "V4L2 camera closed");
            self.closed = true;
        }
    }
}

struct V4l2Session {
    path: String,
    target: Arc<FrameSurface>,
    device_callback: DeviceCallback,
    handler: CallbackHandler,
    stream: Option<CaptureLoopController>,
}

impl Drop for V4l2Session {
    fn drop(&mut self) {
        let _ = self.stop_repeating();
    }
}

impl CaptureSessionHandle for V4l2Session {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> BackendResult<()> {
        self.stop_repeating()?;

        let path = self.path.clone();
        let requested = request.target_size;
        let target = Arc::clone(&self.target);

        let init_error_callback = Arc::clone(&self.device_callback);
        let init_error_handler = self.handler.clone();
        let read_error_callback = Arc::clone(&self.device_callback);
        let read_error_handler = self.handler.clone();

        let init = move || -> Result<_, String> {
            let dev =
                Device::with_path(&path).map_err(|e| format!("Failed to open {}: {}", path, e))?;
            let wanted = Format::new(requested.width, requested.height, FourCC::new(YUYV));
            let format = dev
                .set_format(&wanted)
                .map_err(|e| format!("Failed to set format: {}", e))?;
            if format.fourcc != FourCC::new(YUYV) {
                return Err(format!("Device refused YUYV, got {:?}", format.fourcc));
            }
            if format.width != requested.width || format.height != requested.height {
                warn!(
                    requested = %requested,
                    actual = %Size::new(format.width, format.height),
                    "Driver adjusted the capture size"
                );
            }
            let stream = MmapStream::with_buffers(&dev, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|e| format!("Failed to create stream: {}", e))?;
            info!(width = format.width, height = format.height, "V4L2 stream started");
            Ok((dev, stream, Size::new(format.width, format.height)))
        };

        let mut reported = false;
        let stream_loop = move |(_dev, stream, size): &mut (Device, MmapStream<'static>, Size)| {
            let (buf, meta) = match stream.next() {
                Ok(frame) => frame,
                Err(e) => {
                    if !reported {
                        reported = true;
                        warn!(error = %e, "V4L2 read failed, treating camera as disconnected");
                        let callback = Arc::clone(&read_error_callback);
                        read_error_handler.post(move || callback(DeviceEvent::Disconnected));
                    }
                    return LoopAction::Stop;
                }
            };
            let rgba = yuyv_to_rgba(buf, size.width, size.height);
            match CameraImage::from_rgba(*size, rgba, u64::from(meta.sequence)) {
                Some(image) if target.queue_frame(image) => LoopAction::Continue,
                Some(_) => LoopAction::Stop,
                None => {
                    debug!(bytes = buf.len(), "Short V4L2 frame dropped");
                    LoopAction::Continue
                }
            }
        };

        let controller = CaptureLoopController::start_with_init_or_else(
            threads::V4L2_STREAM,
            init,
            stream_loop,
            move |_message| {
                let callback = Arc::clone(&init_error_callback);
                init_error_handler
                    .post(move || callback(DeviceEvent::Error(device_error::CAMERA_DEVICE)));
            },
        )?;
        self.stream = Some(controller);
        Ok(())
    }

    fn stop_repeating(&mut self) -> BackendResult<()> {
        if let Some(mut controller) = self.stream.take() {
            // A blocked dequeue returns within one frame interval
            controller.stop();
        }
        Ok(())
    }

    fn abort_captures(&mut self) -> BackendResult<()> {
        // Queued buffers are released when the stream is dropped
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stop_repeating();
    }
}

/// Convert YUYV (YUV 4:2:2) to RGBA
///
/// YUYV format: Y0 U0 Y1 V0 - each 4-byte group encodes 2 pixels.
/// Uses BT.601 coefficients.
pub fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixel_count = width as usize * height as usize;
    let mut rgba = Vec::with_capacity(pixel_count * 4);

    for chunk in data.chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        for y in [y0, y1] {
            if rgba.len() >= pixel_count * 4 {
                break;
            }
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }

    rgba
}
