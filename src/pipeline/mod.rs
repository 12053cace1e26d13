// SPDX-License-Identifier: MPL-2.0

//! Camera-to-GPU frame pipeline
//!
//! # Architecture
//!
//! ```text
//!  control thread                 render thread ("edgecam-render")
//! ┌──────────────┐  RenderCommand ┌───────────────────────────────────┐
//! │PipelineHandle│ ─────────────▶ │ CameraRenderer                    │
//! │              │ ◀───────────── │  SurfaceLifecycle ─▶ do_start/stop │
//! └──────────────┘  PipelineEvent │  negotiator ─▶ preview size        │
//!                                 │  RenderResources (camera tex, FBO) │
//!        camera stream thread     │  FrameDispatcher ─▶ FrameProcessor │
//! ┌──────────────┐ frame-available└───────────────────────────────────┘
//! │ FrameSurface │ ── sets update-pending, requests a redraw ──▲
//! └──────────────┘
//! ```
//!
//! All graphics calls and every processor call happen on the render thread.
//! Camera callbacks run on the `CameraBackground` handler thread.

pub mod dispatch;
pub mod lifecycle;
pub mod negotiator;
pub mod render_thread;
pub mod renderer;
pub mod resources;

pub use dispatch::{
    BusyFlag, BusyGuard, DispatchStats, DrawFlags, DrawOutcome, FrameDispatcher, FrameSignals,
    RedrawRequest,
};
pub use lifecycle::{LifecycleFlags, SurfaceLifecycle, Transition};
pub use negotiator::{Negotiated, NegotiationRequest, select_preview_size};
pub use render_thread::{PipelineHandle, PipelineOptions, RenderCommand};
pub use renderer::{CameraRenderer, RendererSettings, RendererStatus, ScreenSnapshot};
pub use resources::{FrameBufferStage, RenderResources, ShaderPrograms};

use std::sync::Arc;

use crate::backends::camera::Size;
use crate::errors::{AppError, ErrorCategory};

/// Notifications for the control layer
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Camera open requested and frame buffer stage ready
    Started { preview: Size },
    Stopped,
    Error {
        category: ErrorCategory,
        message: String,
    },
}

impl PipelineEvent {
    pub fn error(err: impl Into<AppError>) -> Self {
        let err = err.into();
        PipelineEvent::Error {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// Receives pipeline events, from the render or camera callback thread
pub type EventSink = Arc<dyn Fn(PipelineEvent) + Send + Sync>;
