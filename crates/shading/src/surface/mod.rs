//! Surfaces: the per-face material objects the frame loop binds and draws.
//!
//! - `fpl` draws through the fixed pipeline with a flat color or a texture.
//! - `auto` compiles a [`Bsdf`](crate::Bsdf) into a generated program with
//!   lighting and owns its own matrices and light snapshot.
//! - `program` wraps hand-written shader source with user-staged uniforms.
//!
//! Surfaces are shared between faces as [`SharedSurface`] and advertise what
//! the frame loop may feed them through [`Capabilities`].

mod auto;
mod fpl;
mod program;

use std::cell::RefCell;
use std::rc::Rc;

use glam::Mat4;
use image::RgbaImage;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gpu::{GpuBackend, ProgramId, TextureId, UniformValue};
use crate::hash::ContentHash;
use crate::light::Light;
use crate::types::{Capabilities, SurfaceId, Topology, VertexData};

pub use auto::AutoSp;
pub use fpl::Fpl;
pub use program::ShaderProgram;

/// Surface shared by every face drawn with it.
pub type SharedSurface = Rc<RefCell<dyn Surface>>;

/// Wraps a surface for sharing between faces.
pub fn share<S: Surface + 'static>(surface: S) -> SharedSurface {
    Rc::new(RefCell::new(surface))
}

/// The capability set every surface variant provides.
pub trait Surface {
    fn id(&self) -> SurfaceId;

    /// Short variant name for logs and graph exports.
    fn kind(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Checks that `vertices` has the shape this surface draws.
    fn validate_vertices(&self, vertices: &VertexData) -> Result<()>;

    /// Makes the surface current: uploads changed maps, binds its program
    /// and texture units.
    fn bind(&mut self, gpu: &mut dyn GpuBackend) -> Result<()>;

    /// Draws one face. The surface must be bound.
    fn render(
        &mut self,
        gpu: &mut dyn GpuBackend,
        topology: Topology,
        vertices: &VertexData,
    ) -> Result<()>;

    /// Undoes the bindings made by [`Surface::bind`].
    fn unbind(&mut self, gpu: &mut dyn GpuBackend);

    /// Called once per frame after the last face drawn with the surface.
    /// Vertex buffers cached for geometry the frame did not draw are freed.
    fn end_frame(&mut self, _gpu: &mut dyn GpuBackend) {}

    /// Frees every GPU object the surface created. Idempotent; afterwards
    /// `bind` and `render` fail with `Released`.
    fn release(&mut self, gpu: &mut dyn GpuBackend);

    fn is_released(&self) -> bool;

    fn as_transform_mut(&mut self) -> Option<&mut dyn TransformSurface> {
        None
    }

    fn as_lighting_mut(&mut self) -> Option<&mut dyn LightingSurface> {
        None
    }
}

/// Surfaces that consume model/view/projection matrices.
pub trait TransformSurface {
    fn set_model_mat(&mut self, matrix: Mat4);
    fn set_view_mat(&mut self, matrix: Mat4);
    fn set_projection_mat(&mut self, matrix: Mat4);
}

/// Surfaces that consume the scene light list.
pub trait LightingSurface {
    /// Binds the first lights of `lights`, up to the slot limit.
    fn set_light(&mut self, lights: &[Light]) -> LightBinding;
    fn set_ambient(&mut self, ambient: [f32; 3]);
}

/// How many lights a [`LightingSurface::set_light`] call bound and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightBinding {
    pub bound: usize,
    pub truncated: usize,
}

/// A map raster mirrored into one GPU texture, re-uploaded when its content
/// hash moves.
#[derive(Debug, Default)]
pub(crate) struct UploadedMap {
    texture: Option<TextureId>,
    hash: Option<ContentHash>,
}

impl UploadedMap {
    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn sync(
        &mut self,
        gpu: &mut dyn GpuBackend,
        hash: ContentHash,
        image: impl FnOnce() -> RgbaImage,
    ) -> Result<TextureId> {
        match self.texture {
            Some(texture) if self.hash == Some(hash) => Ok(texture),
            Some(texture) => {
                gpu.update_texture(texture, &image())?;
                debug!(texture = texture.0, %hash, "re-uploaded map");
                self.hash = Some(hash);
                Ok(texture)
            }
            None => {
                let texture = gpu.create_texture(&image())?;
                debug!(texture = texture.0, %hash, "uploaded map");
                self.texture = Some(texture);
                self.hash = Some(hash);
                Ok(texture)
            }
        }
    }

    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some(texture) = self.texture.take() {
            gpu.delete_texture(texture);
        }
        self.hash = None;
    }
}

/// Runs `write` with `program` bound, restoring the previous binding after.
pub(crate) fn with_program(
    gpu: &mut dyn GpuBackend,
    program: ProgramId,
    write: impl FnOnce(&mut dyn GpuBackend) -> Result<()>,
) -> Result<()> {
    let previous = gpu.bound_program();
    gpu.use_program(Some(program));
    let outcome = write(gpu);
    gpu.use_program(previous);
    outcome
}

/// Writes a uniform of the bound `program`. A name the program does not
/// declare is logged and skipped; returns whether the write happened.
pub(crate) fn write_uniform(
    gpu: &mut dyn GpuBackend,
    program: ProgramId,
    name: &str,
    value: UniformValue,
) -> Result<bool> {
    match gpu.uniform_location(program, name) {
        Some(location) => {
            gpu.set_uniform(location, &value)?;
            Ok(true)
        }
        None => {
            warn!(program = program.0, uniform = name, "uniform not found in program, skipping");
            Ok(false)
        }
    }
}
