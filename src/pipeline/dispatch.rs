// SPDX-License-Identifier: GPL-3.0-only

//! Frame dispatch loop
//!
//! The frame-available listener runs on the camera stream thread and only
//! marks an update as pending and asks for a redraw. Everything else happens
//! in [`FrameDispatcher::draw_frame`] on the render thread, under the same
//! lock `do_stop` takes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use super::resources::{RenderResources, ShaderPrograms};
use crate::backends::camera::FrameAvailableListener;
use crate::errors::{RenderError, RenderResult};
use crate::gpu::{DrawParams, GpuContext, IDENTITY_MATRIX, RenderTarget, Viewport};
use crate::processor::{FrameProcessor, ProcessingTimer, ProcessorFrame};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// Asks the render thread for another draw
pub type RedrawRequest = Arc<dyn Fn() + Send + Sync>;

/// Flags shared between the listener, the draw loop and `do_stop`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrawFlags {
    pub update_pending: bool,
    pub fbo_ready: bool,
}

#[derive(Clone)]
pub struct FrameSignals {
    flags: Arc<Mutex<DrawFlags>>,
    redraw: RedrawRequest,
}

impl FrameSignals {
    pub fn new(redraw: RedrawRequest) -> Self {
        Self {
            flags: Arc::new(Mutex::new(DrawFlags::default())),
            redraw,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, DrawFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn flags(&self) -> DrawFlags {
        *self.lock()
    }

    /// Listener to install on the frame surface
    pub fn frame_listener(&self) -> FrameAvailableListener {
        let signals = self.clone();
        Arc::new(move || signals.frame_available())
    }

    pub fn frame_available(&self) {
        self.lock().update_pending = true;
        (self.redraw)();
    }

    pub fn request_redraw(&self) {
        (self.redraw)();
    }
}

impl std::fmt::Debug for FrameSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSignals")
            .field("flags", &self.flags())
            .finish()
    }
}

/// At most one processor call in flight
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[must_use]
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What one draw did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// No frame buffer stage, or the processor failed and the previous
    /// output was presented again
    Skipped,
    /// The processor ran and its output was presented
    Processed,
    /// The processor was busy; the previous output was presented again
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub frames_latched: u64,
    pub processed: u64,
    pub dropped: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
pub struct FrameDispatcher {
    busy: BusyFlag,
    timer: ProcessingTimer,
    stats: DispatchStats,
    processor_error: Option<RenderError>,
}

impl FrameDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn busy_flag(&self) -> BusyFlag {
        self.busy.clone()
    }

    pub fn timer(&self) -> &ProcessingTimer {
        &self.timer
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Error of the last failed processor call, if not yet taken
    pub fn take_processor_error(&mut self) -> Option<RenderError> {
        self.processor_error.take()
    }

    /// Draw one frame: latch, blit into the frame buffer stage, process,
    /// present
    pub fn draw_frame(
        &mut self,
        gpu: &mut dyn GpuContext,
        signals: &FrameSignals,
        resources: Option<&RenderResources>,
        programs: &ShaderPrograms,
        processor: &mut dyn FrameProcessor,
        threshold: i32,
    ) -> RenderResult<DrawOutcome> {
        let mut flags = signals.lock();
        let ready = resources
            .filter(|_| flags.fbo_ready)
            .and_then(|r| r.fbo().map(|fbo| (r, *fbo)));
        let Some((resources, fbo)) = ready else {
            self.stats.skipped += 1;
            return Ok(DrawOutcome::Skipped);
        };

        if flags.update_pending {
            flags.update_pending = false;
            if let Some(sequence) = resources.surface().update_tex_image(gpu)? {
                self.stats.frames_latched += 1;
                trace!(sequence, "Frame latched");
            }
        }

        gpu.clear(RenderTarget::Screen, CLEAR_COLOR)?;

        // Camera texture into the intermediate texture
        let target = RenderTarget::Framebuffer(fbo.framebuffer);
        gpu.clear(target, CLEAR_COLOR)?;
        gpu.draw_texture(&DrawParams {
            program: programs.camera,
            texture: resources.camera_texture(),
            target,
            viewport: Viewport::full(fbo.size),
            texture_matrix: resources.surface().transform_matrix(),
            mvp_matrix: IDENTITY_MATRIX,
        })?;

        let outcome = match self.busy.try_acquire() {
            Some(_guard) => {
                let frame = ProcessorFrame {
                    input: fbo.intermediate,
                    output: fbo.draw_target,
                    size: fbo.size,
                    threshold,
                };
                self.timer.start();
                let result = processor.process(gpu, &frame);
                self.timer.stop();
                match result {
                    Ok(()) => {
                        self.stats.processed += 1;
                        DrawOutcome::Processed
                    }
                    Err(e) => {
                        // The previous output is presented again
                        warn!(error = %e, "Frame processor failed");
                        self.processor_error = Some(e);
                        self.stats.skipped += 1;
                        DrawOutcome::Skipped
                    }
                }
            }
            None => {
                trace!("Processor busy, presenting previous output");
                self.stats.dropped += 1;
                DrawOutcome::Dropped
            }
        };

        gpu.draw_texture(&DrawParams {
            program: programs.texture_2d,
            texture: fbo.draw_target,
            target: RenderTarget::Screen,
            viewport: Viewport::full(gpu.screen_size()),
            texture_matrix: IDENTITY_MATRIX,
            mvp_matrix: IDENTITY_MATRIX,
        })?;

        Ok(outcome)
    }
}
