// SPDX-License-Identifier: GPL-3.0-only

//! GPU objects owned by the pipeline
//!
//! [`ShaderPrograms`] live as long as the GPU context. [`RenderResources`]
//! live for one Started period: the camera texture with its frame surface,
//! and the frame buffer stage sized to the preview.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backends::camera::{FrameSurface, Size};
use crate::errors::{RenderError, RenderResult};
use crate::gpu::{FramebufferHandle, GpuContext, ProgramHandle, TextureHandle, TextureKind};
use crate::shaders::ShaderSource;

/// Placeholder size of the camera texture until the first frame arrives
const PLACEHOLDER_SIZE: Size = Size::new(1, 1);

/// The two programs of the pipeline. Failing to build either is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderPrograms {
    /// Samples the camera texture through `cameraTextureMatrix`
    pub camera: ProgramHandle,
    pub texture_2d: ProgramHandle,
}

impl ShaderPrograms {
    pub fn compile(gpu: &mut dyn GpuContext) -> RenderResult<Self> {
        Self::compile_sources(gpu, &ShaderSource::camera(), &ShaderSource::texture_2d())
    }

    pub fn compile_sources(
        gpu: &mut dyn GpuContext,
        camera: &ShaderSource,
        texture_2d: &ShaderSource,
    ) -> RenderResult<Self> {
        camera.check_contract()?;
        texture_2d.check_contract()?;

        let camera = gpu.compile_program(camera)?;
        let texture_2d = match gpu.compile_program(texture_2d) {
            Ok(program) => program,
            Err(e) => {
                gpu.delete_program(camera);
                return Err(e);
            }
        };
        info!("Shader programs ready");
        Ok(Self { camera, texture_2d })
    }

    pub fn delete(self, gpu: &mut dyn GpuContext) {
        gpu.delete_program(self.camera);
        gpu.delete_program(self.texture_2d);
    }
}

/// Offscreen stage between the camera texture and the processor
///
/// The framebuffer renders into `intermediate`, which the processor reads;
/// the processor writes `draw_target`, which is presented on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferStage {
    pub intermediate: TextureHandle,
    pub draw_target: TextureHandle,
    pub framebuffer: FramebufferHandle,
    pub size: Size,
}

impl FrameBufferStage {
    pub fn create(gpu: &mut dyn GpuContext, size: Size) -> RenderResult<Self> {
        let intermediate = gpu.create_texture(TextureKind::Texture2d, size)?;
        let draw_target = match gpu.create_texture(TextureKind::Texture2d, size) {
            Ok(texture) => texture,
            Err(e) => {
                gpu.delete_texture(intermediate);
                return Err(e);
            }
        };
        let framebuffer = match gpu.create_framebuffer(intermediate) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                gpu.delete_texture(draw_target);
                gpu.delete_texture(intermediate);
                return Err(e);
            }
        };
        debug!(%size, "Frame buffer stage created");
        Ok(Self {
            intermediate,
            draw_target,
            framebuffer,
            size,
        })
    }

    pub fn delete(self, gpu: &mut dyn GpuContext) {
        gpu.delete_framebuffer(self.framebuffer);
        gpu.delete_texture(self.intermediate);
        gpu.delete_texture(self.draw_target);
    }
}

/// Render state of one Started period
#[derive(Debug)]
pub struct RenderResources {
    camera_texture: TextureHandle,
    surface: Arc<FrameSurface>,
    fbo: Option<FrameBufferStage>,
}

impl RenderResources {
    /// Allocate the camera texture and bind a fresh frame surface to it
    pub fn allocate(gpu: &mut dyn GpuContext, preview: Option<Size>) -> RenderResult<Self> {
        let size = preview
            .filter(|s| !s.is_empty())
            .unwrap_or(PLACEHOLDER_SIZE);
        let camera_texture = gpu.create_texture(TextureKind::External, size)?;
        let surface = Arc::new(FrameSurface::new(camera_texture));
        debug!(texture = camera_texture.0, %size, "Camera texture allocated");
        Ok(Self {
            camera_texture,
            surface,
            fbo: None,
        })
    }

    pub fn camera_texture(&self) -> TextureHandle {
        self.camera_texture
    }

    pub fn surface(&self) -> &Arc<FrameSurface> {
        &self.surface
    }

    pub fn fbo(&self) -> Option<&FrameBufferStage> {
        self.fbo.as_ref()
    }

    /// Replace the frame buffer stage with one of `size`
    ///
    /// The old framebuffer and textures are deleted first. An incomplete
    /// stage is logged, deleted and reported as an error.
    pub fn recreate_fbo(&mut self, gpu: &mut dyn GpuContext, size: Size) -> RenderResult<()> {
        self.delete_fbo(gpu);

        let stage = FrameBufferStage::create(gpu, size)?;
        let status = gpu.framebuffer_status(stage.framebuffer);
        if !status.is_complete() {
            warn!(%size, %status, "Frame buffer stage incomplete");
            stage.delete(gpu);
            return Err(RenderError::FramebufferIncomplete(status.to_string()));
        }
        info!(%size, "Frame buffer stage ready");
        self.fbo = Some(stage);
        Ok(())
    }

    pub fn delete_fbo(&mut self, gpu: &mut dyn GpuContext) {
        if let Some(stage) = self.fbo.take() {
            stage.delete(gpu);
        }
    }

    /// Release the frame surface and delete every object
    pub fn release(mut self, gpu: &mut dyn GpuContext) {
        self.surface.release();
        self.delete_fbo(gpu);
        gpu.delete_texture(self.camera_texture);
        debug!("Render resources released");
    }
}
