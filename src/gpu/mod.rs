// SPDX-License-Identifier: GPL-3.0-only

//! GPU abstraction used by the frame pipeline
//!
//! The pipeline only talks to the GPU through [`GpuContext`], a small
//! handle-based API shaped after the calls a GL renderer makes: textures,
//! one framebuffer per offscreen stage, two shader programs and a screen.
//! Handles are plain integers so render state can be stored, compared and
//! logged without borrowing the context.
//!
//! [`WgpuContext`] is the real implementation, rendering headlessly into an
//! offscreen "screen" texture that the terminal viewer and snapshot export
//! read back.

mod wgpu_context;

pub use wgpu_context::WgpuContext;

use crate::backends::camera::{CameraImage, Size};
use crate::errors::RenderResult;
use crate::shaders::ShaderSource;
use tracing::info;

pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

/// What a texture is sampled as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Fed by a camera frame surface, sampled by the camera program
    External,
    /// Ordinary 2-D texture
    Texture2d,
}

/// Where a draw or clear lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Screen,
    Framebuffer(FramebufferHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Viewport covering a whole target of `size`
    pub fn full(size: Size) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// Color attachment texture was deleted
    MissingAttachment,
    /// Color attachment has no storage
    ZeroSized,
    /// Handle unknown to the context
    Unknown,
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }
}

impl std::fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramebufferStatus::Complete => write!(f, "complete"),
            FramebufferStatus::MissingAttachment => write!(f, "missing color attachment"),
            FramebufferStatus::ZeroSized => write!(f, "zero sized attachment"),
            FramebufferStatus::Unknown => write!(f, "unknown framebuffer"),
        }
    }
}

/// One textured full-screen quad draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawParams {
    pub program: ProgramHandle,
    pub texture: TextureHandle,
    pub target: RenderTarget,
    pub viewport: Viewport,
    /// Bound to `cameraTextureMatrix`
    pub texture_matrix: [f32; 16],
    /// Bound to `mvpMatrix`
    pub mvp_matrix: [f32; 16],
}

/// Live object counts, used to check nothing leaks across restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub textures: usize,
    pub framebuffers: usize,
    pub programs: usize,
}

/// Graphics calls made by the render thread
///
/// Implementations are owned by exactly one thread; nothing here is `Sync`.
/// Deleting an unknown handle is a no-op, as with GL.
pub trait GpuContext {
    fn compile_program(&mut self, source: &ShaderSource) -> RenderResult<ProgramHandle>;
    fn delete_program(&mut self, program: ProgramHandle);

    fn create_texture(&mut self, kind: TextureKind, size: Size) -> RenderResult<TextureHandle>;
    fn delete_texture(&mut self, texture: TextureHandle);
    fn texture_size(&self, texture: TextureHandle) -> Option<Size>;

    /// Replace the contents of a texture with tightly packed RGBA8 rows.
    ///
    /// If `size` differs from the texture's current size the storage is
    /// re-specified first, keeping the handle valid.
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        size: Size,
        rgba: &[u8],
    ) -> RenderResult<()>;

    fn upload_image(&mut self, texture: TextureHandle, image: &CameraImage) -> RenderResult<()> {
        self.write_texture(texture, image.size, &image.data)
    }

    /// Read a texture back as tightly packed RGBA8 rows
    fn read_texture(&mut self, texture: TextureHandle) -> RenderResult<Vec<u8>>;

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> RenderResult<()>;

    fn create_framebuffer(&mut self, color: TextureHandle) -> RenderResult<FramebufferHandle>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;
    fn framebuffer_size(&self, framebuffer: FramebufferHandle) -> Option<Size>;

    fn clear(&mut self, target: RenderTarget, color: [f32; 4]) -> RenderResult<()>;
    fn draw_texture(&mut self, params: &DrawParams) -> RenderResult<()>;

    fn screen_size(&self) -> Size;
    fn resize_screen(&mut self, size: Size) -> RenderResult<()>;
    fn read_screen(&mut self) -> RenderResult<Vec<u8>>;

    /// Wait for submitted work to finish
    fn flush(&mut self) -> RenderResult<()>;

    fn resource_counts(&self) -> ResourceCounts;
}

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
}

/// Create a wgpu device and queue for headless rendering.
///
/// # Arguments
///
/// * `label` - A label for the device (for debugging)
pub async fn create_render_device(
    label: &str,
) -> Result<(wgpu::Device, wgpu::Queue, GpuDeviceInfo), String> {
    info!(label = label, "Creating GPU device for rendering");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| format!("Failed to find suitable GPU adapter: {}", e))?;

    let adapter_info = adapter.get_info();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for rendering"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| format!("Failed to create GPU device: {}", e))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
    };

    Ok((device, queue, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_render_device() {
        // This test requires a GPU, so it may be skipped in CI
        match pollster::block_on(create_render_device("test_device")) {
            Ok((device, queue, info)) => {
                println!("Created device: {:?}", info);
                assert!(!info.adapter_name.is_empty());
                drop(queue);
                drop(device);
            }
            Err(e) => {
                // Skip if no GPU available
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }

    #[test]
    fn test_viewport_full() {
        let viewport = Viewport::full(Size::new(640, 480));
        assert_eq!((viewport.x, viewport.y), (0, 0));
        assert_eq!((viewport.width, viewport.height), (640, 480));
    }
}
