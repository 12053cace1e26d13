// SPDX-License-Identifier: GPL-3.0-only

//! Camera renderer
//!
//! Owns everything the render thread touches: the GPU context, the shader
//! programs, the resources of the current Started period, the frame
//! processor and the lifecycle flags. `do_start` and `do_stop` run only on
//! the lifecycle edges.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::dispatch::{DispatchStats, DrawFlags, DrawOutcome, FrameDispatcher, FrameSignals};
use super::lifecycle::{LifecycleFlags, SurfaceLifecycle, Transition};
use super::negotiator::{NegotiationRequest, select_preview_size};
use super::resources::{RenderResources, ShaderPrograms};
use super::{EventSink, PipelineEvent};
use crate::backends::camera::{
    CaptureSessionManager, DisplayMetrics, SessionSnapshot, Size, find_rear_camera,
};
use crate::constants::{
    ASPECT_RATIO_TOLERANCE, MAX_PREVIEW_HEIGHT, MAX_PREVIEW_WIDTH, clamp_threshold,
};
use crate::errors::{AppError, AppResult, CameraError, RenderError, RenderResult};
use crate::gpu::GpuContext;
use crate::processor::FrameProcessor;

/// Tunables of the renderer, usually taken from the config
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererSettings {
    /// Configured preview cap, combined with the hardware cap
    pub max_preview: Size,
    pub aspect_tolerance: f64,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            max_preview: Size::new(MAX_PREVIEW_WIDTH, MAX_PREVIEW_HEIGHT),
            aspect_tolerance: ASPECT_RATIO_TOLERANCE,
        }
    }
}

/// Point-in-time view of the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct RendererStatus {
    pub started: bool,
    pub lifecycle: LifecycleFlags,
    pub surface_size: Size,
    pub preview: Option<Size>,
    pub flags: DrawFlags,
    pub dispatch: DispatchStats,
    pub average_processing: Duration,
    pub processing_fps: f64,
    pub threshold: i32,
    pub session: SessionSnapshot,
}

/// The presented screen, read back as RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub size: Size,
    pub rgba: Vec<u8>,
}

impl ScreenSnapshot {
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.size.width, self.size.height, self.rgba.clone())
    }

    pub fn save_png(&self, path: &Path) -> AppResult<()> {
        let image = self
            .to_image()
            .ok_or_else(|| AppError::Other("snapshot buffer does not match its size".into()))?;
        image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| AppError::Io(format!("Failed to save {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Snapshot saved");
        Ok(())
    }
}

pub struct CameraRenderer {
    gpu: Box<dyn GpuContext>,
    manager: CaptureSessionManager,
    processor: Box<dyn FrameProcessor>,
    programs: ShaderPrograms,
    lifecycle: SurfaceLifecycle,
    resources: Option<RenderResources>,
    signals: FrameSignals,
    dispatcher: FrameDispatcher,
    threshold: Arc<AtomicI32>,
    display: DisplayMetrics,
    settings: RendererSettings,
    surface_size: Size,
    preview: Option<Size>,
    /// The last frame buffer build failed; the next resize tries again
    fbo_retry: bool,
    events: EventSink,
}

impl CameraRenderer {
    /// Compile the shader programs and wire the camera error path to `events`
    ///
    /// A program that fails to compile aborts construction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut gpu: Box<dyn GpuContext>,
        manager: CaptureSessionManager,
        processor: Box<dyn FrameProcessor>,
        settings: RendererSettings,
        display: DisplayMetrics,
        threshold: Arc<AtomicI32>,
        signals: FrameSignals,
        events: EventSink,
    ) -> RenderResult<Self> {
        let programs = ShaderPrograms::compile(gpu.as_mut())?;

        let sink = Arc::clone(&events);
        manager.set_error_listener(Arc::new(move |err: CameraError| {
            sink(PipelineEvent::error(err));
        }));

        Ok(Self {
            gpu,
            manager,
            processor,
            programs,
            lifecycle: SurfaceLifecycle::new(),
            resources: None,
            signals,
            dispatcher: FrameDispatcher::new(),
            threshold,
            display,
            settings,
            surface_size: Size::default(),
            preview: None,
            fbo_retry: false,
            events,
        })
    }

    pub fn gpu(&self) -> &dyn GpuContext {
        self.gpu.as_ref()
    }

    pub fn manager(&self) -> &CaptureSessionManager {
        &self.manager
    }

    pub fn signals(&self) -> &FrameSignals {
        &self.signals
    }

    pub fn dispatcher(&self) -> &FrameDispatcher {
        &self.dispatcher
    }

    pub fn resources(&self) -> Option<&RenderResources> {
        self.resources.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    pub fn preview(&self) -> Option<Size> {
        self.preview
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        let transition = self.lifecycle.set_enabled(enabled);
        self.apply(transition);
    }

    pub fn set_visible(&mut self, visible: bool) {
        let transition = self.lifecycle.set_visible(visible);
        self.apply(transition);
    }

    /// The drawing surface exists and has `size`
    pub fn surface_created(&mut self, size: Size) {
        self.surface_changed(size);
    }

    /// The drawing surface was resized
    ///
    /// Re-runs negotiation. If the pipeline is running and the preview size
    /// changed, the camera and the render resources are rebuilt at the new
    /// size.
    pub fn surface_changed(&mut self, size: Size) {
        if size.is_empty() {
            warn!(%size, "Ignoring empty surface size");
            return;
        }
        self.surface_size = size;
        if let Err(e) = self.gpu.resize_screen(size) {
            self.report(e);
        }

        let preview = self.negotiate();
        if preview != self.preview {
            info!(old = ?self.preview, new = ?preview, "Preview size changed");
            self.preview = preview;
            if self.lifecycle.is_started() {
                self.do_stop();
                self.do_start();
            }
        } else if self.fbo_retry
            && self.lifecycle.is_started()
            && let Some(preview) = preview
        {
            debug!(%preview, "Retrying frame buffer stage");
            self.create_fbo(preview);
        }

        let transition = self.lifecycle.set_has_surface(true);
        self.apply(transition);
    }

    pub fn surface_destroyed(&mut self) {
        let transition = self.lifecycle.set_has_surface(false);
        self.apply(transition);
    }

    fn apply(&mut self, transition: Option<Transition>) {
        match transition {
            Some(Transition::Start) => self.do_start(),
            Some(Transition::Stop) => self.do_stop(),
            None => {}
        }
    }

    fn negotiate(&mut self) -> Option<Size> {
        let camera = match find_rear_camera(self.manager.driver().as_ref()) {
            Ok(Some(camera)) => camera,
            Ok(None) => {
                self.report(CameraError::NoRearCamera);
                return None;
            }
            Err(e) => {
                self.report(CameraError::from(e));
                return None;
            }
        };

        let request = NegotiationRequest::new(
            self.surface_size,
            self.display,
            camera.sensor_orientation,
        )
        .with_max_size(self.settings.max_preview)
        .with_tolerance(self.settings.aspect_tolerance);

        match select_preview_size(&request, &camera.output_sizes) {
            Some(negotiated) => Some(negotiated.preview),
            None => {
                self.report(CameraError::NoPreviewSize);
                None
            }
        }
    }

    /// Allocate the camera texture, open the camera and build the frame
    /// buffer stage at the current preview size
    fn do_start(&mut self) {
        info!(preview = ?self.preview, "Starting pipeline");

        let resources = match RenderResources::allocate(self.gpu.as_mut(), self.preview) {
            Ok(resources) => resources,
            Err(e) => {
                error!(error = %e, "Failed to allocate the camera texture");
                self.report(e);
                return;
            }
        };
        resources
            .surface()
            .set_on_frame_available(self.signals.frame_listener());
        let surface = Arc::clone(resources.surface());
        self.resources = Some(resources);

        let Some(preview) = self.preview else {
            debug!("No preview size yet, waiting for a surface size");
            return;
        };

        if let Err(e) = self.manager.open_camera(surface, preview) {
            self.report(e);
            return;
        }
        self.create_fbo(preview);
    }

    fn create_fbo(&mut self, size: Size) {
        let Some(resources) = self.resources.as_mut() else {
            return;
        };

        let result = {
            let mut flags = self.signals.lock();
            flags.fbo_ready = false;
            let result = resources.recreate_fbo(self.gpu.as_mut(), size);
            flags.fbo_ready = result.is_ok();
            result
        };

        self.fbo_retry = result.is_err();
        match result {
            Ok(()) => {
                self.processor.on_started(size);
                (self.events)(PipelineEvent::Started { preview: size });
                self.signals.request_redraw();
            }
            Err(e) => self.report(e),
        }
    }

    /// Close the camera and release the render resources
    fn do_stop(&mut self) {
        info!("Stopping pipeline");
        {
            let mut flags = self.signals.lock();
            flags.update_pending = false;
            flags.fbo_ready = false;
        }
        self.fbo_retry = false;

        // The flags lock is not held here: the stream thread takes it from
        // the frame listener while close_camera joins that thread
        self.manager.close_camera();

        if let Some(resources) = self.resources.take() {
            resources.release(self.gpu.as_mut());
        }
        self.processor.on_stopped();
        (self.events)(PipelineEvent::Stopped);
    }

    /// Draw one frame if the pipeline has something to show
    pub fn draw(&mut self) -> DrawOutcome {
        let threshold = clamp_threshold(self.threshold.load(Ordering::Relaxed));
        let result = self.dispatcher.draw_frame(
            self.gpu.as_mut(),
            &self.signals,
            self.resources.as_ref(),
            &self.programs,
            self.processor.as_mut(),
            threshold,
        );
        if let Some(e) = self.dispatcher.take_processor_error() {
            self.report(e);
        }
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report(e);
                DrawOutcome::Skipped
            }
        }
    }

    pub fn screen_snapshot(&mut self) -> RenderResult<ScreenSnapshot> {
        self.gpu.flush()?;
        let rgba = self.gpu.read_screen()?;
        let size = self.gpu.screen_size();
        if rgba.len() != size.rgba_len() {
            return Err(RenderError::Readback(format!(
                "expected {} bytes for {}, got {}",
                size.rgba_len(),
                size,
                rgba.len()
            )));
        }
        Ok(ScreenSnapshot { size, rgba })
    }

    pub fn status(&self) -> RendererStatus {
        let timer = self.dispatcher.timer();
        RendererStatus {
            started: self.lifecycle.is_started(),
            lifecycle: self.lifecycle.flags(),
            surface_size: self.surface_size,
            preview: self.preview,
            flags: self.signals.flags(),
            dispatch: self.dispatcher.stats(),
            average_processing: timer.average(),
            processing_fps: timer.fps(),
            threshold: clamp_threshold(self.threshold.load(Ordering::Relaxed)),
            session: self.manager.snapshot(),
        }
    }

    /// Stop the pipeline if running and delete the programs
    pub fn shutdown(mut self) {
        if self.lifecycle.is_started() {
            let transition = self.lifecycle.set_enabled(false);
            self.apply(transition);
        }
        self.programs.delete(self.gpu.as_mut());
        info!("Renderer shut down");
    }

    fn report(&self, err: impl Into<AppError>) {
        let err = err.into();
        warn!(error = %err, category = ?err.category(), "Pipeline error");
        (self.events)(PipelineEvent::error(err));
    }
}
