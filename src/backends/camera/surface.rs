// SPDX-License-Identifier: GPL-3.0-only

//! Frame surface: the hand-off point between a camera stream and the GPU
//!
//! Drivers push decoded images into a [`FrameSurface`] from their streaming
//! thread. Only the newest image is kept. Each push fires the
//! frame-available listener, which must stay cheap: the render thread latches
//! the image into the bound camera texture later with
//! [`FrameSurface::update_tex_image`].

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use super::{CameraImage, Size};
use crate::errors::RenderResult;
use crate::gpu::{GpuContext, IDENTITY_MATRIX, TextureHandle};

/// Called from the producing thread whenever a new image is queued
pub type FrameAvailableListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceStats {
    pub queued: u64,
    pub latched: u64,
    /// Images replaced by a newer one before being latched
    pub overwritten: u64,
}

struct SurfaceState {
    default_buffer_size: Size,
    pending: Option<CameraImage>,
    listener: Option<FrameAvailableListener>,
    transform: [f32; 16],
    latched_sequence: Option<u64>,
    released: bool,
    stats: SurfaceStats,
}

pub struct FrameSurface {
    texture: TextureHandle,
    state: Mutex<SurfaceState>,
}

impl FrameSurface {
    /// Create a surface feeding `texture`
    pub fn new(texture: TextureHandle) -> Self {
        Self {
            texture,
            state: Mutex::new(SurfaceState {
                default_buffer_size: Size::default(),
                pending: None,
                listener: None,
                transform: IDENTITY_MATRIX,
                latched_sequence: None,
                released: false,
                stats: SurfaceStats::default(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    /// Size producers should stream at
    pub fn set_default_buffer_size(&self, size: Size) {
        self.state().default_buffer_size = size;
    }

    pub fn default_buffer_size(&self) -> Size {
        self.state().default_buffer_size
    }

    pub fn set_on_frame_available(&self, listener: FrameAvailableListener) {
        self.state().listener = Some(listener);
    }

    /// Texture coordinate transform applied when sampling the camera texture
    pub fn set_transform(&self, transform: [f32; 16]) {
        self.state().transform = transform;
    }

    pub fn transform_matrix(&self) -> [f32; 16] {
        self.state().transform
    }

    /// Producer side: keep `image` as the newest frame and notify the listener.
    ///
    /// Returns false once the surface has been released.
    pub fn queue_frame(&self, image: CameraImage) -> bool {
        let listener = {
            let mut state = self.state();
            if state.released {
                return false;
            }
            if state.pending.replace(image).is_some() {
                state.stats.overwritten += 1;
            }
            state.stats.queued += 1;
            state.listener.clone()
        };

        // Outside the lock: the listener takes the render flags lock
        if let Some(listener) = listener {
            listener();
        }
        true
    }

    /// Render thread side: upload the newest queued image into the texture.
    ///
    /// Returns the sequence number of the latched image, or `None` when no
    /// new image was queued since the last latch.
    pub fn update_tex_image(&self, gpu: &mut dyn GpuContext) -> RenderResult<Option<u64>> {
        let image = {
            let mut state = self.state();
            if state.released {
                return Ok(None);
            }
            state.pending.take()
        };

        let Some(image) = image else {
            return Ok(None);
        };

        gpu.upload_image(self.texture, &image)?;

        let mut state = self.state();
        state.latched_sequence = Some(image.sequence);
        state.stats.latched += 1;
        trace!(sequence = image.sequence, "Latched camera image");
        Ok(Some(image.sequence))
    }

    pub fn latched_sequence(&self) -> Option<u64> {
        self.state().latched_sequence
    }

    /// Drop any pending image and stop accepting new ones
    pub fn release(&self) {
        let mut state = self.state();
        if !state.released {
            state.released = true;
            state.pending = None;
            state.listener = None;
            debug!(texture = self.texture.0, "Frame surface released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    pub fn stats(&self) -> SurfaceStats {
        self.state().stats
    }
}

impl std::fmt::Debug for FrameSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("FrameSurface")
            .field("texture", &self.texture)
            .field("default_buffer_size", &state.default_buffer_size)
            .field("released", &state.released)
            .field("stats", &state.stats)
            .finish()
    }
}
