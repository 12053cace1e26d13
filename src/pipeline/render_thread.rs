// SPDX-License-Identifier: GPL-3.0-only

//! Render thread and its control handle
//!
//! The render thread owns the GPU context and the [`CameraRenderer`]. The
//! control thread talks to it only through [`RenderCommand`]s; results come
//! back as [`PipelineEvent`]s. The threshold is shared as an atomic and read
//! once per frame.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::dispatch::FrameSignals;
use super::renderer::{CameraRenderer, RendererSettings, RendererStatus, ScreenSnapshot};
use super::{EventSink, PipelineEvent};
use crate::backends::camera::{
    CameraDriver, CaptureSessionManager, DisplayMetrics, HandlerThread, Size,
};
use crate::constants::{
    CAMERA_OPEN_TIMEOUT, DEFAULT_FRAME_RATE, RenderMode, THRESHOLD_DEFAULT, clamp_threshold,
    threads,
};
use crate::errors::{AppError, AppResult, RenderResult};
use crate::gpu::GpuContext;
use crate::processor::FrameProcessor;

/// How long control calls wait for a reply from the render thread
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages processed in order by the render thread
pub enum RenderCommand {
    SetEnabled(bool),
    SetVisible(bool),
    SurfaceCreated(Size),
    SurfaceChanged(Size),
    SurfaceDestroyed,
    Redraw,
    Snapshot(Sender<RenderResult<ScreenSnapshot>>),
    Status(Sender<RendererStatus>),
    Shutdown,
}

impl std::fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderCommand::SetEnabled(v) => write!(f, "SetEnabled({})", v),
            RenderCommand::SetVisible(v) => write!(f, "SetVisible({})", v),
            RenderCommand::SurfaceCreated(s) => write!(f, "SurfaceCreated({})", s),
            RenderCommand::SurfaceChanged(s) => write!(f, "SurfaceChanged({})", s),
            RenderCommand::SurfaceDestroyed => write!(f, "SurfaceDestroyed"),
            RenderCommand::Redraw => write!(f, "Redraw"),
            RenderCommand::Snapshot(_) => write!(f, "Snapshot"),
            RenderCommand::Status(_) => write!(f, "Status"),
            RenderCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Everything needed to start a pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub display: DisplayMetrics,
    pub settings: RendererSettings,
    pub render_mode: RenderMode,
    /// Redraw rate in continuous mode
    pub frame_rate: u32,
    pub open_timeout: Duration,
    pub threshold: i32,
}

impl PipelineOptions {
    pub fn new(display: DisplayMetrics) -> Self {
        Self {
            display,
            settings: RendererSettings::default(),
            render_mode: RenderMode::default(),
            frame_rate: DEFAULT_FRAME_RATE,
            open_timeout: CAMERA_OPEN_TIMEOUT,
            threshold: THRESHOLD_DEFAULT,
        }
    }
}

/// Control-thread side of a running pipeline
pub struct PipelineHandle {
    commands: Sender<RenderCommand>,
    events: Receiver<PipelineEvent>,
    threshold: Arc<AtomicI32>,
    render_thread: Option<JoinHandle<()>>,
    camera_thread: Option<HandlerThread>,
}

impl PipelineHandle {
    /// Start the camera callback thread and the render thread
    ///
    /// `gpu_factory` runs on the render thread with the initial screen size.
    /// Returns once the GPU context exists and both shader programs are
    /// built; a failure there is returned here and nothing keeps running.
    pub fn spawn<G>(
        options: PipelineOptions,
        driver: Arc<dyn CameraDriver>,
        gpu_factory: G,
        processor: Box<dyn FrameProcessor>,
    ) -> AppResult<Self>
    where
        G: FnOnce(Size) -> RenderResult<Box<dyn GpuContext>> + Send + 'static,
    {
        let camera_thread = HandlerThread::start(threads::CAMERA_CALLBACKS)?;
        let manager =
            CaptureSessionManager::new(driver, camera_thread.handler(), options.open_timeout);

        let (command_tx, command_rx) = mpsc::channel::<RenderCommand>();
        let (event_tx, event_rx) = mpsc::channel::<PipelineEvent>();
        let (ready_tx, ready_rx) = mpsc::channel::<RenderResult<()>>();

        let threshold = Arc::new(AtomicI32::new(clamp_threshold(options.threshold)));

        // Coalesce redraw requests: at most one Redraw waits in the queue
        let redraw_queued = Arc::new(AtomicBool::new(false));
        let redraw_tx = Mutex::new(command_tx.clone());
        let queued = Arc::clone(&redraw_queued);
        let signals = FrameSignals::new(Arc::new(move || {
            if !queued.swap(true, Ordering::AcqRel) {
                let _ = redraw_tx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .send(RenderCommand::Redraw);
            }
        }));

        let events: EventSink = {
            let event_tx = Mutex::new(event_tx);
            Arc::new(move |event| {
                debug!(?event, "Pipeline event");
                let _ = event_tx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .send(event);
            })
        };

        let render_threshold = Arc::clone(&threshold);
        let render_thread = thread::Builder::new()
            .name(threads::RENDER.to_string())
            .spawn(move || {
                let gpu = match gpu_factory(options.display.size) {
                    Ok(gpu) => gpu,
                    Err(e) => {
                        error!(error = %e, "Failed to create GPU context");
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let renderer = match CameraRenderer::new(
                    gpu,
                    manager,
                    processor,
                    options.settings,
                    options.display,
                    render_threshold,
                    signals,
                    events,
                ) {
                    Ok(renderer) => renderer,
                    Err(e) => {
                        error!(error = %e, "Failed to build shader programs");
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                render_loop(renderer, command_rx, redraw_queued, options);
            })?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AppError::Other("render thread exited during startup".into()));
        if let Err(e) = ready.and_then(|r| r.map_err(AppError::from)) {
            let _ = render_thread.join();
            return Err(e);
        }

        info!(mode = ?options.render_mode, "Pipeline running");
        Ok(Self {
            commands: command_tx,
            events: event_rx,
            threshold,
            render_thread: Some(render_thread),
            camera_thread: Some(camera_thread),
        })
    }

    fn send(&self, command: RenderCommand) {
        if self.commands.send(command).is_err() {
            warn!("Render thread is gone, command dropped");
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.send(RenderCommand::SetEnabled(enabled));
    }

    pub fn set_visible(&self, visible: bool) {
        self.send(RenderCommand::SetVisible(visible));
    }

    pub fn surface_created(&self, size: Size) {
        self.send(RenderCommand::SurfaceCreated(size));
    }

    pub fn surface_changed(&self, size: Size) {
        self.send(RenderCommand::SurfaceChanged(size));
    }

    pub fn surface_destroyed(&self) {
        self.send(RenderCommand::SurfaceDestroyed);
    }

    pub fn request_redraw(&self) {
        self.send(RenderCommand::Redraw);
    }

    /// Set the threshold handed to the processor, clamped into range
    pub fn set_threshold(&self, value: i32) -> i32 {
        let value = clamp_threshold(value);
        self.threshold.store(value, Ordering::Relaxed);
        value
    }

    pub fn threshold(&self) -> i32 {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Read back the presented screen
    pub fn snapshot(&self) -> AppResult<ScreenSnapshot> {
        let (tx, rx) = mpsc::channel();
        self.send(RenderCommand::Snapshot(tx));
        let result = rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| AppError::Other("render thread did not answer".into()))?;
        Ok(result?)
    }

    pub fn status(&self) -> AppResult<RendererStatus> {
        let (tx, rx) = mpsc::channel();
        self.send(RenderCommand::Status(tx));
        rx.recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| AppError::Other("render thread did not answer".into()))
    }

    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    /// Next pending event, without blocking
    pub fn try_event(&self) -> Option<PipelineEvent> {
        self.events.try_recv().ok()
    }

    /// Stop the pipeline, then both threads
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        if let Some(handle) = self.render_thread.take() {
            let _ = self.commands.send(RenderCommand::Shutdown);
            if handle.join().is_err() {
                error!("Render thread panicked");
            }
        }
        if let Some(mut camera_thread) = self.camera_thread.take() {
            camera_thread.quit_safely();
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

fn render_loop(
    mut renderer: CameraRenderer,
    commands: Receiver<RenderCommand>,
    redraw_queued: Arc<AtomicBool>,
    options: PipelineOptions,
) {
    let interval = Duration::from_secs(1) / options.frame_rate.max(1);
    let mut next_frame = Instant::now() + interval;
    let mut dirty = false;

    loop {
        let command = match options.render_mode {
            RenderMode::Continuous => {
                let wait = next_frame.saturating_duration_since(Instant::now());
                match commands.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            RenderMode::WhenDirty => match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        if let Some(command) = command {
            match command {
                RenderCommand::SetEnabled(enabled) => renderer.set_enabled(enabled),
                RenderCommand::SetVisible(visible) => renderer.set_visible(visible),
                RenderCommand::SurfaceCreated(size) => renderer.surface_created(size),
                RenderCommand::SurfaceChanged(size) => renderer.surface_changed(size),
                RenderCommand::SurfaceDestroyed => renderer.surface_destroyed(),
                RenderCommand::Redraw => {
                    redraw_queued.store(false, Ordering::Release);
                    dirty = true;
                }
                RenderCommand::Snapshot(reply) => {
                    let _ = reply.send(renderer.screen_snapshot());
                }
                RenderCommand::Status(reply) => {
                    let _ = reply.send(renderer.status());
                }
                RenderCommand::Shutdown => break,
            }
        }

        let draw_now = match options.render_mode {
            RenderMode::Continuous => {
                let now = Instant::now();
                let tick = now >= next_frame;
                if tick {
                    next_frame += interval;
                    // Fell behind: restart the schedule instead of bursting
                    if next_frame < now {
                        next_frame = now + interval;
                    }
                }
                tick
            }
            RenderMode::WhenDirty => dirty,
        };
        if draw_now {
            dirty = false;
            renderer.draw();
        }
    }

    debug!("Render loop exiting");
    renderer.shutdown();
}
