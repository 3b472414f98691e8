//! Abstract GPU pipeline consumed by the surfaces.
//!
//! Surfaces never talk to a graphics API directly; they issue calls against
//! [`GpuBackend`], which mirrors the small subset of a fixed-function plus
//! programmable pipeline the engine needs:
//! - texture objects bound to numbered units,
//! - compiled programs with named uniforms,
//! - vertex buffers bound to attribute locations,
//! - fixed-pipeline toggles, flat color and emission,
//! - the fixed-pipeline projection and view,
//! - immediate and buffered draws under a transform stack.
//!
//! `recording` implements the trait headlessly and is what the CLI and the
//! tests drive. `state` holds the scoped guard that keeps fixed-pipeline
//! toggles symmetric, and `uniforms` the typed uniform values.

mod recording;
mod state;
mod uniforms;

use image::RgbaImage;
use serde::Serialize;

use crate::error::Result;
use crate::types::{ScalarType, Topology, Vertex};

pub use recording::{Command, RecordingBackend, DEFAULT_TEXTURE_UNITS};
pub use state::StateScope;
pub use uniforms::{UniformKind, UniformValue};

/// Opaque handle to a texture object owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TextureId(pub u32);

/// Opaque handle to a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProgramId(pub u32);

/// Opaque handle to a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferId(pub u32);

/// A resolved uniform slot inside one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UniformLocation {
    pub program: ProgramId,
    pub index: u32,
}

/// Fixed-pipeline toggles a surface may enable while it draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Texture2d,
    Blend,
    ColorMaterial,
    Lighting,
    DepthTest,
}

/// Layout of one attribute stream inside a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferLayout {
    pub components: u32,
    pub scalar: ScalarType,
    /// Bytes between consecutive vertices; 0 means tightly packed.
    pub stride: u32,
    pub offset: u32,
}

impl BufferLayout {
    pub fn packed(components: u32, scalar: ScalarType) -> Self {
        Self {
            components,
            scalar,
            stride: 0,
            offset: 0,
        }
    }
}

/// Neutral emission term restored after every emissive draw.
pub const NEUTRAL_EMISSION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// The pipeline operations surfaces are compiled down to.
pub trait GpuBackend {
    /// Number of texture units available to programs and the fixed pipeline.
    fn max_texture_units(&self) -> u32;

    /// Clears the color buffer to `rgba` and the depth buffer.
    fn clear(&mut self, rgba: [f32; 4]);

    fn create_texture(&mut self, image: &RgbaImage) -> Result<TextureId>;
    fn update_texture(&mut self, texture: TextureId, image: &RgbaImage) -> Result<()>;
    fn delete_texture(&mut self, texture: TextureId);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> Result<()>;

    fn compile_program(&mut self, vertex: &str, fragment: &str) -> Result<ProgramId>;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>);
    fn bound_program(&self) -> Option<ProgramId>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    /// Writes a uniform of the currently bound program.
    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) -> Result<()>;

    fn create_buffer(&mut self, bytes: &[u8]) -> Result<BufferId>;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn bind_vertex_buffer(
        &mut self,
        location: u32,
        buffer: Option<BufferId>,
        layout: BufferLayout,
    ) -> Result<()>;

    fn enable(&mut self, capability: Capability);
    fn disable(&mut self, capability: Capability);
    fn set_color(&mut self, rgba: [f32; 4]);
    fn set_emission(&mut self, rgba: [f32; 4]);

    /// Immediate-mode draw used by the fixed pipeline.
    fn draw_vertices(&mut self, topology: Topology, vertices: &[Vertex]) -> Result<()>;
    /// Draws `count` vertices from the currently bound vertex buffers.
    fn draw_arrays(&mut self, topology: Topology, count: usize) -> Result<()>;

    /// Loads the projection and view matrices the fixed pipeline draws
    /// under. Transforms pushed afterwards apply in model space.
    fn set_fixed_camera(&mut self, projection: [f32; 16], view: [f32; 16]);

    fn push_transform(&mut self, matrix: [f32; 16]);
    fn pop_transform(&mut self);
}
