// SPDX-License-Identifier: GPL-3.0-only

//! Shader programs of the frame pipeline
//!
//! Two programs draw a textured quad: the camera program samples the texture
//! fed by the camera frame surface, the 2-D program samples ordinary
//! textures. Both declare the same vertex inputs and uniform block so the
//! renderer can bind them by name:
//!
//! | kind      | name                  |
//! |-----------|-----------------------|
//! | attribute | `position`            |
//! | attribute | `texturePosition`     |
//! | uniform   | `cameraTextureMatrix` |
//! | uniform   | `mvpMatrix`           |
//! | sampler   | `cameraTexture` (camera) / `sampler2DTexture` (2-D) |

use std::borrow::Cow;
use std::collections::HashSet;

use crate::backends::camera::SensorRotation;
use crate::constants::shader_names;
use crate::errors::{RenderError, RenderResult};

pub const CAMERA_PROGRAM_SOURCE: &str = include_str!("camera_external.wgsl");
pub const TEXTURE_2D_PROGRAM_SOURCE: &str = include_str!("texture_2d.wgsl");

/// Vertex entry point of both programs
pub const VERTEX_ENTRY: &str = "vs_main";
/// Fragment entry point of both programs
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Clip-space corners of the quad, drawn as a triangle strip
pub const QUAD_POSITIONS: [[f32; 2]; 4] = [[-1.0, -1.0], [-1.0, 1.0], [1.0, -1.0], [1.0, 1.0]];

/// Texture coordinates matching [`QUAD_POSITIONS`] (origin at the top-left texel)
pub const QUAD_TEX_COORDS: [[f32; 2]; 4] = [[0.0, 1.0], [0.0, 0.0], [1.0, 1.0], [1.0, 0.0]];

/// Uniform block shared by both programs
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawUniforms {
    pub camera_texture_matrix: [f32; 16],
    pub mvp_matrix: [f32; 16],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Samples the camera frame surface texture
    Camera,
    /// Samples ordinary 2-D textures
    Texture2d,
}

impl ProgramKind {
    /// Name of the sampled texture binding
    pub fn sampler_name(&self) -> &'static str {
        match self {
            ProgramKind::Camera => shader_names::CAMERA_TEXTURE,
            ProgramKind::Texture2d => shader_names::SAMPLER_2D_TEXTURE,
        }
    }

    /// Every identifier the program must declare
    pub fn required_names(&self) -> [&'static str; 5] {
        [
            shader_names::POSITION,
            shader_names::TEXTURE_POSITION,
            shader_names::CAMERA_TEXTURE_MATRIX,
            shader_names::MVP_MATRIX,
            self.sampler_name(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub name: Cow<'static, str>,
    pub kind: ProgramKind,
    pub wgsl: Cow<'static, str>,
}

impl ShaderSource {
    pub fn camera() -> Self {
        Self {
            name: Cow::Borrowed("camera"),
            kind: ProgramKind::Camera,
            wgsl: Cow::Borrowed(CAMERA_PROGRAM_SOURCE),
        }
    }

    pub fn texture_2d() -> Self {
        Self {
            name: Cow::Borrowed("texture_2d"),
            kind: ProgramKind::Texture2d,
            wgsl: Cow::Borrowed(TEXTURE_2D_PROGRAM_SOURCE),
        }
    }

    /// Check that the source declares every name the renderer binds by
    ///
    /// Names are looked up in the parsed module: entry point arguments,
    /// global variables, and the members of the structs they are typed with.
    /// Text in comments does not count.
    pub fn check_contract(&self) -> RenderResult<()> {
        let module = naga::front::wgsl::parse_str(&self.wgsl).map_err(|e| {
            RenderError::ShaderCompile {
                program: self.name.to_string(),
                message: e.emit_to_string(&self.wgsl),
            }
        })?;
        let declared = declared_names(&module);
        for name in self.kind.required_names() {
            if !declared.contains(name) {
                return Err(RenderError::ShaderContract {
                    program: self.name.to_string(),
                    missing: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn declared_names(module: &naga::Module) -> HashSet<&str> {
    let mut names = HashSet::new();
    for entry_point in &module.entry_points {
        for arg in &entry_point.function.arguments {
            names.extend(arg.name.as_deref());
            insert_struct_members(module, arg.ty, &mut names);
        }
    }
    for (_, var) in module.global_variables.iter() {
        names.extend(var.name.as_deref());
        insert_struct_members(module, var.ty, &mut names);
    }
    names
}

fn insert_struct_members<'a>(
    module: &'a naga::Module,
    ty: naga::Handle<naga::Type>,
    names: &mut HashSet<&'a str>,
) {
    if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
        names.extend(members.iter().filter_map(|m| m.name.as_deref()));
    }
}

/// Column-major transform from quad texture coordinates to camera image
/// coordinates for a sensor mounted `rotation` clockwise
pub fn texture_transform(rotation: SensorRotation) -> [f32; 16] {
    // u' = a*u + b*v + c, v' = d*u + e*v + f
    let (a, b, c, d, e, f) = match rotation {
        SensorRotation::None => (1.0, 0.0, 0.0, 0.0, 1.0, 0.0),
        SensorRotation::Rotate90 => (0.0, 1.0, 0.0, -1.0, 0.0, 1.0),
        SensorRotation::Rotate180 => (-1.0, 0.0, 1.0, 0.0, -1.0, 1.0),
        SensorRotation::Rotate270 => (0.0, -1.0, 1.0, 1.0, 0.0, 0.0),
    };
    [
        a, d, 0.0, 0.0, //
        b, e, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        c, f, 0.0, 1.0,
    ]
}

/// Apply a column-major 4x4 matrix to a texture coordinate
pub fn transform_tex_coord(matrix: &[f32; 16], uv: [f32; 2]) -> [f32; 2] {
    [
        matrix[0] * uv[0] + matrix[4] * uv[1] + matrix[12],
        matrix[1] * uv[0] + matrix[5] * uv[1] + matrix[13],
    ]
}
