// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles shared by the integration tests
//!
//! [`FakeGpu`] keeps textures as CPU buffers and records every draw.
//! [`FakeDriver`] is a camera driver whose failures are chosen by the test.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use edgecam::backends::camera::{
    BackendError, BackendResult, CallbackHandler, CameraCharacteristics, CameraDeviceHandle,
    CameraDriver, CaptureRequest, CaptureSessionHandle, DeviceCallback, DeviceEvent, FrameSurface,
    LensFacing, SensorRotation, SessionCallback, SessionEvent, Size,
};
use edgecam::errors::{RenderError, RenderResult};
use edgecam::gpu::{
    DrawParams, FramebufferHandle, FramebufferStatus, GpuContext, ProgramHandle, RenderTarget,
    ResourceCounts, TextureHandle, TextureKind,
};
use edgecam::shaders::ShaderSource;

pub const TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// GPU
// ============================================================================

#[derive(Debug, Default)]
pub struct FakeGpuState {
    next_handle: u32,
    pub textures: HashMap<TextureHandle, (Size, Vec<u8>)>,
    pub framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    pub programs: HashMap<ProgramHandle, String>,
    pub screen: Size,
    pub draws: Vec<DrawParams>,
    pub clears: Vec<RenderTarget>,
    pub uploads: usize,
    /// Program names whose compilation fails
    pub failing_programs: HashSet<String>,
    /// Framebuffers report this status instead of checking their attachment
    pub forced_status: Option<FramebufferStatus>,
}

impl FakeGpuState {
    fn next(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// CPU-side [`GpuContext`]; clones share the same state
#[derive(Debug, Clone, Default)]
pub struct FakeGpu {
    state: Arc<Mutex<FakeGpuState>>,
}

impl FakeGpu {
    pub fn new(screen: Size) -> Self {
        let gpu = Self::default();
        gpu.state().screen = screen;
        gpu
    }

    pub fn state(&self) -> MutexGuard<'_, FakeGpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn boxed(&self) -> Box<dyn GpuContext> {
        Box::new(self.clone())
    }

    pub fn fail_program(&self, name: &str) {
        self.state().failing_programs.insert(name.to_string());
    }

    pub fn screen_draws(&self) -> Vec<DrawParams> {
        self.state()
            .draws
            .iter()
            .filter(|d| d.target == RenderTarget::Screen)
            .copied()
            .collect()
    }
}

impl GpuContext for FakeGpu {
    fn compile_program(&mut self, source: &ShaderSource) -> RenderResult<ProgramHandle> {
        let mut state = self.state();
        if state.failing_programs.contains(source.name.as_ref()) {
            return Err(RenderError::ShaderCompile {
                program: source.name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        let handle = ProgramHandle(state.next());
        state.programs.insert(handle, source.name.to_string());
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.state().programs.remove(&program);
    }

    fn create_texture(&mut self, _kind: TextureKind, size: Size) -> RenderResult<TextureHandle> {
        if size.is_empty() {
            return Err(RenderError::Device(format!("empty texture {}", size)));
        }
        let mut state = self.state();
        let handle = TextureHandle(state.next());
        state
            .textures
            .insert(handle, (size, vec![0; size.rgba_len()]));
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.state().textures.remove(&texture);
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<Size> {
        self.state().textures.get(&texture).map(|(size, _)| *size)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        size: Size,
        rgba: &[u8],
    ) -> RenderResult<()> {
        let mut state = self.state();
        state.uploads += 1;
        let entry = state
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::InvalidHandle(format!("texture {}", texture.0)))?;
        *entry = (size, rgba.to_vec());
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> RenderResult<Vec<u8>> {
        self.state()
            .textures
            .get(&texture)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| RenderError::InvalidHandle(format!("texture {}", texture.0)))
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> RenderResult<()> {
        let data = self.read_texture(src)?;
        let size = self
            .texture_size(src)
            .ok_or_else(|| RenderError::InvalidHandle(format!("texture {}", src.0)))?;
        self.write_texture(dst, size, &data)
    }

    fn create_framebuffer(&mut self, color: TextureHandle) -> RenderResult<FramebufferHandle> {
        let mut state = self.state();
        if !state.textures.contains_key(&color) {
            return Err(RenderError::InvalidHandle(format!("texture {}", color.0)));
        }
        let handle = FramebufferHandle(state.next());
        state.framebuffers.insert(handle, color);
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.state().framebuffers.remove(&framebuffer);
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let state = self.state();
        if let Some(status) = state.forced_status {
            return status;
        }
        match state.framebuffers.get(&framebuffer) {
            None => FramebufferStatus::Unknown,
            Some(color) if !state.textures.contains_key(color) => {
                FramebufferStatus::MissingAttachment
            }
            Some(_) => FramebufferStatus::Complete,
        }
    }

    fn framebuffer_size(&self, framebuffer: FramebufferHandle) -> Option<Size> {
        let state = self.state();
        let color = state.framebuffers.get(&framebuffer)?;
        state.textures.get(color).map(|(size, _)| *size)
    }

    fn clear(&mut self, target: RenderTarget, _color: [f32; 4]) -> RenderResult<()> {
        self.state().clears.push(target);
        Ok(())
    }

    fn draw_texture(&mut self, params: &DrawParams) -> RenderResult<()> {
        let mut state = self.state();
        if !state.programs.contains_key(&params.program) {
            return Err(RenderError::InvalidHandle(format!(
                "program {}",
                params.program.0
            )));
        }
        if !state.textures.contains_key(&params.texture) {
            return Err(RenderError::InvalidHandle(format!(
                "texture {}",
                params.texture.0
            )));
        }
        state.draws.push(*params);
        Ok(())
    }

    fn screen_size(&self) -> Size {
        self.state().screen
    }

    fn resize_screen(&mut self, size: Size) -> RenderResult<()> {
        self.state().screen = size;
        Ok(())
    }

    fn read_screen(&mut self) -> RenderResult<Vec<u8>> {
        Ok(vec![0; self.state().screen.rgba_len()])
    }

    fn flush(&mut self) -> RenderResult<()> {
        Ok(())
    }

    fn resource_counts(&self) -> ResourceCounts {
        let state = self.state();
        ResourceCounts {
            textures: state.textures.len(),
            framebuffers: state.framebuffers.len(),
            programs: state.programs.len(),
        }
    }
}

// ============================================================================
// Camera driver
// ============================================================================

/// How the fake device answers an open request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Post `Opened`
    Succeed,
    /// Refuse synchronously from `open`
    Refuse(BackendError),
    /// Post `Error(code)` instead of `Opened`
    ErrorEvent(i32),
    /// Never answer
    Hang,
}

/// How the fake session answers configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureBehavior {
    Succeed,
    Fail(String),
    /// The repeating request is rejected
    RejectRequest,
    /// Never answer until [`FakeDriver::complete_configure`]
    Hang,
}

/// Counters shared with every device and session the driver hands out
#[derive(Default)]
pub struct DriverLog {
    pub opens: AtomicUsize,
    pub device_closes: AtomicUsize,
    pub session_closes: AtomicUsize,
    pub stop_repeating: AtomicUsize,
    pub requests: Mutex<Vec<CaptureRequest>>,
    pub targets: Mutex<Vec<Arc<FrameSurface>>>,
    /// Session callback held back by [`ConfigureBehavior::Hang`]
    pending_configure: Mutex<Option<(CallbackHandler, SessionCallback)>>,
}

impl DriverLog {
    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_target(&self) -> Option<Arc<FrameSurface>> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

pub struct FakeDriver {
    cameras: Vec<CameraCharacteristics>,
    permission: AtomicBool,
    open_behavior: Mutex<OpenBehavior>,
    configure_behavior: Mutex<ConfigureBehavior>,
    pub log: Arc<DriverLog>,
    last_open: Mutex<Option<(CallbackHandler, DeviceCallback)>>,
}

pub fn camera(id: &str, facing: LensFacing, sizes: &[Size]) -> CameraCharacteristics {
    CameraCharacteristics {
        id: id.to_string(),
        name: format!("fake {}", id),
        lens_facing: facing,
        sensor_orientation: SensorRotation::None,
        flash_available: true,
        output_sizes: sizes.to_vec(),
    }
}

impl FakeDriver {
    pub fn new(cameras: Vec<CameraCharacteristics>) -> Self {
        Self {
            cameras,
            permission: AtomicBool::new(true),
            open_behavior: Mutex::new(OpenBehavior::Succeed),
            configure_behavior: Mutex::new(ConfigureBehavior::Succeed),
            log: Arc::new(DriverLog::default()),
            last_open: Mutex::new(None),
        }
    }

    /// A front camera followed by a 16:9 capable rear camera with a flash
    pub fn with_rear_camera() -> Self {
        Self::new(vec![
            camera("front", LensFacing::Front, &[Size::new(640, 480)]),
            camera(
                "rear",
                LensFacing::Back,
                &[
                    Size::new(4000, 3000),
                    Size::new(1920, 1080),
                    Size::new(1280, 720),
                    Size::new(640, 480),
                ],
            ),
        ])
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        *self
            .open_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    pub fn set_configure_behavior(&self, behavior: ConfigureBehavior) {
        *self
            .configure_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Answer a configuration held back by [`ConfigureBehavior::Hang`]
    /// with a working session
    pub fn complete_configure(&self) -> bool {
        let pending = self
            .log
            .pending_configure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some((handler, callback)) => {
                let session = FakeSession {
                    reject_request: false,
                    log: Arc::clone(&self.log),
                    closed: false,
                };
                handler.post(move || callback(SessionEvent::Configured(Box::new(session))))
            }
            None => false,
        }
    }

    /// Post a device event to the callback of the last open request
    pub fn inject(&self, event: DeviceEvent) -> bool {
        let last = self
            .last_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match last {
            Some((handler, callback)) => handler.post(move || callback(event)),
            None => false,
        }
    }
}

impl CameraDriver for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    fn camera_ids(&self) -> BackendResult<Vec<String>> {
        Ok(self.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, camera_id: &str) -> BackendResult<CameraCharacteristics> {
        self.cameras
            .iter()
            .find(|c| c.id == camera_id)
            .cloned()
            .ok_or_else(|| BackendError::DeviceNotFound(camera_id.to_string()))
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
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        *self
            .last_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((handler.clone(), callback.clone()));

        let behavior = self
            .open_behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match behavior {
            OpenBehavior::Succeed => {
                let configure = self
                    .configure_behavior
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                let device = FakeDevice {
                    id: camera_id.to_string(),
                    configure,
                    log: Arc::clone(&self.log),
                    closed: false,
                };
                handler.post(move || callback(DeviceEvent::Opened(Box::new(device))));
                Ok(())
            }
            OpenBehavior::Refuse(err) => Err(err),
            OpenBehavior::ErrorEvent(code) => {
                handler.post(move || callback(DeviceEvent::Error(code)));
                Ok(())
            }
            OpenBehavior::Hang => Ok(()),
        }
    }
}

struct FakeDevice {
    id: String,
    configure: ConfigureBehavior,
    log: Arc<DriverLog>,
    closed: bool,
}

impl CameraDeviceHandle for FakeDevice {
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
        self.log
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target);
        let event = match &self.configure {
            ConfigureBehavior::Hang => {
                *self
                    .log
                    .pending_configure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some((handler.clone(), callback));
                return Ok(());
            }
            ConfigureBehavior::Fail(message) => SessionEvent::ConfigureFailed(message.clone()),
            behavior => SessionEvent::Configured(Box::new(FakeSession {
                reject_request: *behavior == ConfigureBehavior::RejectRequest,
                log: Arc::clone(&self.log),
                closed: false,
            })),
        };
        handler.post(move || callback(event));
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.device_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct FakeSession {
    reject_request: bool,
    log: Arc<DriverLog>,
    closed: bool,
}

impl CaptureSessionHandle for FakeSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> BackendResult<()> {
        if self.reject_request {
            return Err(BackendError::Other("request rejected".to_string()));
        }
        self.log
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(())
    }

    fn stop_repeating(&mut self) -> BackendResult<()> {
        self.log.stop_repeating.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort_captures(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.session_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

use edgecam::backends::camera::{CaptureSessionManager, DisplayMetrics, HandlerThread};
use edgecam::pipeline::{
    CameraRenderer, EventSink, FrameSignals, PipelineEvent, RendererSettings,
};
use edgecam::processor::FrameProcessor;
use std::sync::atomic::AtomicI32;
use std::sync::mpsc::{self, Receiver};

/// Wait until callbacks posted by callbacks have run too
pub fn settle(manager: &CaptureSessionManager) {
    for _ in 0..4 {
        assert!(manager.flush_callbacks(TIMEOUT), "callback thread stuck");
    }
}

pub fn event_sink() -> (EventSink, Receiver<PipelineEvent>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let sink: EventSink = Arc::new(move |event| {
        let _ = tx.lock().unwrap_or_else(PoisonError::into_inner).send(event);
    });
    (sink, rx)
}

pub fn drain(events: &Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    events.try_iter().collect()
}

/// A renderer on the test thread, with its camera callback thread
pub struct Harness {
    pub renderer: CameraRenderer,
    pub events: Receiver<PipelineEvent>,
    pub driver: Arc<FakeDriver>,
    pub gpu: FakeGpu,
    pub threshold: Arc<AtomicI32>,
    pub redraws: Arc<AtomicUsize>,
    pub camera_thread: HandlerThread,
}

impl Harness {
    pub fn new(driver: FakeDriver, screen: Size, processor: Box<dyn FrameProcessor>) -> Self {
        let driver = Arc::new(driver);
        let gpu = FakeGpu::new(screen);
        Self::build(driver, gpu, screen, processor)
            .unwrap_or_else(|e| panic!("renderer failed to start: {}", e))
    }

    pub fn build(
        driver: Arc<FakeDriver>,
        gpu: FakeGpu,
        screen: Size,
        processor: Box<dyn FrameProcessor>,
    ) -> RenderResult<Self> {
        let camera_thread =
            HandlerThread::start("test-camera").unwrap_or_else(|e| panic!("{}", e));
        let manager = CaptureSessionManager::new(
            driver.clone() as Arc<dyn CameraDriver>,
            camera_thread.handler(),
            Duration::from_millis(500),
        );
        let (sink, events) = event_sink();
        let threshold = Arc::new(AtomicI32::new(80));
        let redraws = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&redraws);
        let signals = FrameSignals::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let renderer = CameraRenderer::new(
            gpu.boxed(),
            manager,
            processor,
            RendererSettings::default(),
            DisplayMetrics::new(screen, SensorRotation::None),
            Arc::clone(&threshold),
            signals,
            sink,
        )?;

        Ok(Self {
            renderer,
            events,
            driver,
            gpu,
            threshold,
            redraws,
            camera_thread,
        })
    }

    pub fn settle(&self) {
        settle(self.renderer.manager());
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        drain(&self.events)
    }

    /// Push one uniformly colored frame into the running camera surface
    pub fn push_frame(&self, rgba: [u8; 4], sequence: u64) -> bool {
        let Some(resources) = self.renderer.resources() else {
            return false;
        };
        let surface = resources.surface();
        let size = surface.default_buffer_size();
        let data: Vec<u8> = rgba.iter().copied().cycle().take(size.rgba_len()).collect();
        match edgecam::backends::camera::CameraImage::from_rgba(size, data, sequence) {
            Some(image) => surface.queue_frame(image),
            None => false,
        }
    }
}
