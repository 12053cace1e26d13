// SPDX-License-Identifier: GPL-3.0-only

//! Headless wgpu implementation of [`GpuContext`]

use std::collections::HashMap;

use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use super::{
    DrawParams, FramebufferHandle, FramebufferStatus, GpuContext, GpuDeviceInfo, ProgramHandle,
    RenderTarget, ResourceCounts, TextureHandle, TextureKind,
};
use crate::backends::camera::Size;
use crate::errors::{RenderError, RenderResult};
use crate::shaders::{self, DrawUniforms, ShaderSource};

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: Size,
    kind: TextureKind,
}

struct ProgramEntry {
    name: String,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// Offscreen renderer backed by a wgpu device
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: GpuDeviceInfo,
    next_handle: u32,
    textures: HashMap<TextureHandle, TextureEntry>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    programs: HashMap<ProgramHandle, ProgramEntry>,
    screen: TextureEntry,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    position_buffer: wgpu::Buffer,
    tex_coord_buffer: wgpu::Buffer,
}

impl WgpuContext {
    /// Create a device and an offscreen screen of `screen_size`
    pub fn new(screen_size: Size) -> RenderResult<Self> {
        let (device, queue, info) =
            pollster::block_on(super::create_render_device("edgecam render"))
                .map_err(RenderError::Device)?;
        Ok(Self::with_device(device, queue, info, screen_size))
    }

    pub fn with_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        info: GpuDeviceInfo,
        screen_size: Size,
    ) -> Self {
        let screen = create_texture_entry(&device, "screen", TextureKind::Texture2d, screen_size);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("edgecam_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("edgecam_uniform_buffer"),
            size: std::mem::size_of::<DrawUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let position_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("edgecam_position_buffer"),
            contents: bytemuck::cast_slice(&shaders::QUAD_POSITIONS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let tex_coord_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("edgecam_tex_coord_buffer"),
            contents: bytemuck::cast_slice(&shaders::QUAD_TEX_COORDS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        info!(
            adapter = %info.adapter_name,
            screen = %screen_size,
            "Render context ready"
        );

        Self {
            device,
            queue,
            info,
            next_handle: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            screen,
            sampler,
            uniform_buffer,
            position_buffer,
            tex_coord_buffer,
        }
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }

    /// Run `f` inside a validation error scope, turning captured errors into `RenderError`
    fn scoped<T>(
        &self,
        f: impl FnOnce(&Self) -> T,
        on_error: impl FnOnce(String) -> RenderError,
    ) -> RenderResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(self);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(on_error(err.to_string())),
            None => Ok(value),
        }
    }

    fn texture(&self, handle: TextureHandle) -> RenderResult<&TextureEntry> {
        self.textures
            .get(&handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("texture {}", handle.0)))
    }

    fn target_view(&self, target: RenderTarget) -> RenderResult<&wgpu::TextureView> {
        match target {
            RenderTarget::Screen => Ok(&self.screen.view),
            RenderTarget::Framebuffer(fb) => {
                let color = self
                    .framebuffers
                    .get(&fb)
                    .ok_or_else(|| RenderError::InvalidHandle(format!("framebuffer {}", fb.0)))?;
                let entry = self.textures.get(color).ok_or_else(|| {
                    RenderError::FramebufferIncomplete(format!(
                        "framebuffer {} lost its color attachment",
                        fb.0
                    ))
                })?;
                Ok(&entry.view)
            }
        }
    }

    fn read_entry(&self, entry: &TextureEntry) -> RenderResult<Vec<u8>> {
        let Size { width, height } = entry.size;
        let unpadded_bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("edgecam_readback_buffer"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("edgecam_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(entry.size),
        );
        self.queue.submit(Some(encoder.finish()));

        let padded = pollster::block_on(read_buffer_async(&self.device, &staging_buffer))
            .map_err(RenderError::Readback)?;

        let mut rgba = Vec::with_capacity(entry.size.rgba_len());
        for row in padded.chunks(padded_bytes_per_row as usize) {
            rgba.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
        }
        Ok(rgba)
    }
}

impl GpuContext for WgpuContext {
    fn compile_program(&mut self, source: &ShaderSource) -> RenderResult<ProgramHandle> {
        source.check_contract()?;

        let program_name = source.name.to_string();
        let (pipeline, bind_group_layout) = self.scoped(
            |ctx| build_pipeline(&ctx.device, source),
            |message| RenderError::ShaderCompile {
                program: program_name.clone(),
                message,
            },
        )?;

        let handle = ProgramHandle(self.allocate_handle());
        self.programs.insert(
            handle,
            ProgramEntry {
                name: source.name.to_string(),
                pipeline,
                bind_group_layout,
            },
        );
        debug!(program = %source.name, handle = handle.0, "Program compiled");
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(entry) = self.programs.remove(&program) {
            debug!(program = %entry.name, "Program deleted");
        }
    }

    fn create_texture(&mut self, kind: TextureKind, size: Size) -> RenderResult<TextureHandle> {
        if size.is_empty() {
            return Err(RenderError::Device(format!(
                "cannot create {} texture",
                size
            )));
        }
        let handle = TextureHandle(self.allocate_handle());
        let label = format!("texture_{}", handle.0);
        let entry = self.scoped(
            |ctx| create_texture_entry(&ctx.device, &label, kind, size),
            RenderError::Device,
        )?;
        self.textures.insert(handle, entry);
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<Size> {
        self.textures.get(&texture).map(|entry| entry.size)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        size: Size,
        rgba: &[u8],
    ) -> RenderResult<()> {
        if rgba.len() != size.rgba_len() {
            return Err(RenderError::Device(format!(
                "expected {} bytes for {}, got {}",
                size.rgba_len(),
                size,
                rgba.len()
            )));
        }

        let current = self.texture(texture)?;
        if current.size != size {
            // Re-specify storage under the same handle
            let kind = current.kind;
            let label = format!("texture_{}", texture.0);
            let entry = create_texture_entry(&self.device, &label, kind, size);
            if let Some(old) = self.textures.insert(texture, entry) {
                old.texture.destroy();
            }
            debug!(texture = texture.0, size = %size, "Texture storage re-specified");
        }

        let entry = self.texture(texture)?;
        self.scoped(
            |ctx| {
                ctx.queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &entry.texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    rgba,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(size.width * 4),
                        rows_per_image: Some(size.height),
                    },
                    extent(size),
                );
            },
            RenderError::Device,
        )
    }

    fn read_texture(&mut self, texture: TextureHandle) -> RenderResult<Vec<u8>> {
        let entry = self.texture(texture)?;
        self.read_entry(entry)
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> RenderResult<()> {
        let src_entry = self.texture(src)?;
        let dst_entry = self.texture(dst)?;
        let size = src_entry.size.min(dst_entry.size);

        self.scoped(
            |ctx| {
                let mut encoder =
                    ctx.device
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("edgecam_copy"),
                        });
                encoder.copy_texture_to_texture(
                    src_entry.texture.as_image_copy(),
                    dst_entry.texture.as_image_copy(),
                    extent(size),
                );
                ctx.queue.submit(Some(encoder.finish()));
            },
            RenderError::Device,
        )
    }

    fn create_framebuffer(&mut self, color: TextureHandle) -> RenderResult<FramebufferHandle> {
        self.texture(color)?;
        let handle = FramebufferHandle(self.allocate_handle());
        self.framebuffers.insert(handle, color);
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        match self.framebuffers.get(&framebuffer) {
            None => FramebufferStatus::Unknown,
            Some(color) => match self.textures.get(color) {
                None => FramebufferStatus::MissingAttachment,
                Some(entry) if entry.size.is_empty() => FramebufferStatus::ZeroSized,
                Some(_) => FramebufferStatus::Complete,
            },
        }
    }

    fn framebuffer_size(&self, framebuffer: FramebufferHandle) -> Option<Size> {
        let color = self.framebuffers.get(&framebuffer)?;
        self.texture_size(*color)
    }

    fn clear(&mut self, target: RenderTarget, color: [f32; 4]) -> RenderResult<()> {
        let view = self.target_view(target)?;
        self.scoped(
            |ctx| {
                let mut encoder =
                    ctx.device
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("edgecam_clear"),
                        });
                {
                    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("edgecam_clear_pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view,
                            depth_slice: None,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color {
                                    r: color[0] as f64,
                                    g: color[1] as f64,
                                    b: color[2] as f64,
                                    a: color[3] as f64,
                                }),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                }
                ctx.queue.submit(Some(encoder.finish()));
            },
            RenderError::Device,
        )
    }

    fn draw_texture(&mut self, params: &DrawParams) -> RenderResult<()> {
        let program = self
            .programs
            .get(&params.program)
            .ok_or_else(|| RenderError::InvalidHandle(format!("program {}", params.program.0)))?;
        let texture = self.texture(params.texture)?;
        let view = self.target_view(params.target)?;

        if params.viewport.width == 0 || params.viewport.height == 0 {
            warn!(target = ?params.target, "Skipping draw into empty viewport");
            return Ok(());
        }

        let uniforms = DrawUniforms {
            camera_texture_matrix: params.texture_matrix,
            mvp_matrix: params.mvp_matrix,
        };

        self.scoped(
            |ctx| {
                ctx.queue
                    .write_buffer(&ctx.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

                let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("edgecam_draw_bind_group"),
                    layout: &program.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&texture.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&ctx.sampler),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: ctx.uniform_buffer.as_entire_binding(),
                        },
                    ],
                });

                let mut encoder =
                    ctx.device
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("edgecam_draw"),
                        });
                {
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("edgecam_draw_pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view,
                            depth_slice: None,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    let vp = params.viewport;
                    pass.set_viewport(
                        vp.x as f32,
                        vp.y as f32,
                        vp.width as f32,
                        vp.height as f32,
                        0.0,
                        1.0,
                    );
                    pass.set_pipeline(&program.pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.set_vertex_buffer(0, ctx.position_buffer.slice(..));
                    pass.set_vertex_buffer(1, ctx.tex_coord_buffer.slice(..));
                    pass.draw(0..4, 0..1);
                }
                ctx.queue.submit(Some(encoder.finish()));
            },
            RenderError::Device,
        )
    }

    fn screen_size(&self) -> Size {
        self.screen.size
    }

    fn resize_screen(&mut self, size: Size) -> RenderResult<()> {
        if size.is_empty() {
            return Err(RenderError::Device(format!("cannot resize screen to {}", size)));
        }
        if size != self.screen.size {
            let screen = create_texture_entry(&self.device, "screen", TextureKind::Texture2d, size);
            let old = std::mem::replace(&mut self.screen, screen);
            old.texture.destroy();
            debug!(size = %size, "Screen resized");
        }
        Ok(())
    }

    fn read_screen(&mut self) -> RenderResult<Vec<u8>> {
        self.read_entry(&self.screen)
    }

    fn flush(&mut self) -> RenderResult<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| RenderError::Device(e.to_string()))
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            textures: self.textures.len(),
            framebuffers: self.framebuffers.len(),
            programs: self.programs.len(),
        }
    }
}

fn extent(size: Size) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn create_texture_entry(
    device: &wgpu::Device,
    label: &str,
    kind: TextureKind,
    size: Size,
) -> TextureEntry {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    TextureEntry {
        texture,
        view,
        size,
        kind,
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    source: &ShaderSource,
) -> (wgpu::RenderPipeline, wgpu::BindGroupLayout) {
    let label = source.name.as_ref();
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.wgsl.clone()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            // Sampled texture (cameraTexture / sampler2DTexture)
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            // Sampler
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            // cameraTextureMatrix + mvpMatrix
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let vertex_buffers = [
        // position
        wgpu::VertexBufferLayout {
            array_stride: 8,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            }],
        },
        // texturePosition
        wgpu::VertexBufferLayout {
            array_stride: 8,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: 1,
            }],
        },
    ];

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some(shaders::VERTEX_ENTRY),
            buffers: &vertex_buffers,
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some(shaders::FRAGMENT_ENTRY),
            targets: &[Some(wgpu::ColorTargetState {
                format: TEXTURE_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        multiview: None,
        cache: None,
    });

    (pipeline, bind_group_layout)
}

/// Map a MAP_READ buffer and copy its contents out
async fn read_buffer_async(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}
