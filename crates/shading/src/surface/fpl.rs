use tracing::{debug, warn};

use super::{Surface, UploadedMap};
use crate::bsdf::MapSource;
use crate::error::{Result, ShadingError};
use crate::gpu::{Capability, GpuBackend, StateScope};
use crate::hash::soft_update;
use crate::mix::validate_unit;
use crate::types::{Capabilities, SurfaceId, Topology, VertexData, BASE_COLOR_UNIT};

/// Fixed-pipeline surface: a flat color or a texture plus an emission term.
///
/// A composite made only of constants is drawn as a flat color and never
/// allocates a texture.
#[derive(Debug)]
pub struct Fpl {
    id: SurfaceId,
    base_color: MapSource,
    emission: f32,
    map: UploadedMap,
    released: bool,
}

impl Fpl {
    pub fn new(base_color: impl Into<MapSource>, emission: f32) -> Result<Self> {
        validate_unit("emission", emission)?;
        Ok(Self {
            id: SurfaceId::next(),
            base_color: base_color.into(),
            emission,
            map: UploadedMap::default(),
            released: false,
        })
    }

    pub fn base_color(&self) -> &MapSource {
        &self.base_color
    }

    pub fn emission(&self) -> f32 {
        self.emission
    }

    pub fn set_base_color(&mut self, base_color: impl Into<MapSource>) {
        self.base_color = base_color.into();
    }

    pub fn set_emission(&mut self, emission: f32) -> Result<()> {
        validate_unit("emission", emission)?;
        self.emission = emission;
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            Err(ShadingError::Released(self.id))
        } else {
            Ok(())
        }
    }
}

impl Surface for Fpl {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "fpl"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn validate_vertices(&self, vertices: &VertexData) -> Result<()> {
        match vertices {
            VertexData::Mesh(_) => Ok(()),
            VertexData::Attributes(_) => Err(ShadingError::invalid(
                "fixed-pipeline surfaces draw position/uv/normal vertices, not attribute buffers",
            )),
        }
    }

    fn bind(&mut self, gpu: &mut dyn GpuBackend) -> Result<()> {
        self.ensure_live()?;
        if self.base_color.constant_color().is_some() {
            return Ok(());
        }
        soft_update(self.base_color.node());
        let base_color = &self.base_color;
        let texture = self
            .map
            .sync(gpu, base_color.hash(), || base_color.to_rgba8())?;
        gpu.bind_texture(BASE_COLOR_UNIT, Some(texture))
    }

    fn render(
        &mut self,
        gpu: &mut dyn GpuBackend,
        topology: Topology,
        vertices: &VertexData,
    ) -> Result<()> {
        self.ensure_live()?;
        self.validate_vertices(vertices)?;
        let VertexData::Mesh(vertices) = vertices else {
            return Ok(());
        };

        let mut scope = StateScope::new(gpu);
        match self.base_color.constant_color() {
            Some(rgba) => {
                if rgba[3] < 1.0 {
                    scope.enable(Capability::Blend);
                }
                scope.gpu().set_color(rgba);
            }
            None => {
                scope.enable(Capability::Texture2d);
                scope.gpu().set_color([1.0; 4]);
            }
        }
        if self.emission != 0.0 {
            let e = self.emission;
            scope.set_emission([e, e, e, 1.0]);
        }
        scope.gpu().draw_vertices(topology, vertices)
    }

    fn unbind(&mut self, gpu: &mut dyn GpuBackend) {
        if self.map.texture().is_none() {
            return;
        }
        if let Err(err) = gpu.bind_texture(BASE_COLOR_UNIT, None) {
            warn!(surface = %self.id, error = %err, "failed to unbind base color texture");
        }
    }

    fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if self.released {
            return;
        }
        self.map.release(gpu);
        self.released = true;
        debug!(surface = %self.id, "released fpl surface");
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Command, RecordingBackend, NEUTRAL_EMISSION};
    use crate::mix::{Channel, MixChannel};
    use crate::texture::{PixelFormat, Texture};
    use crate::types::{ChannelId, Vertex};

    fn triangle() -> VertexData {
        VertexData::Mesh(vec![
            Vertex::new([0.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([1.0, 0.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.0, 1.0, 0.0], [0.0, 1.0]),
        ])
    }

    #[test]
    fn constant_color_draws_flat_without_texture() {
        let mut gpu = RecordingBackend::new();
        let mut surface = Fpl::new(MixChannel::solid([1.0, 0.0, 0.0, 1.0]).unwrap(), 0.0).unwrap();
        surface.bind(&mut gpu).unwrap();
        surface.render(&mut gpu, Topology::Triangles, &triangle()).unwrap();
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.color(), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(gpu.draw_calls(), 1);
    }

    #[test]
    fn textured_emissive_render_restores_state() {
        let texture = Texture::load(vec![200, 100, 50], 1, 1, PixelFormat::Rgb8).unwrap();
        let mix = MixChannel::rgb((2, 2), Channel::new(&texture, ChannelId::R), 0.5, 0.5).unwrap();
        let mut gpu = RecordingBackend::new();
        let mut surface = Fpl::new(mix, 0.4).unwrap();
        surface.bind(&mut gpu).unwrap();
        surface.render(&mut gpu, Topology::Triangles, &triangle()).unwrap();

        assert!(gpu.enabled_capabilities().is_empty());
        assert_eq!(gpu.emission(), NEUTRAL_EMISSION);
        assert!(gpu.bound_texture(BASE_COLOR_UNIT).is_some());
        assert!(gpu
            .commands()
            .contains(&Command::Enable { capability: Capability::Texture2d }));
        assert!(gpu.commands().contains(&Command::SetEmission { rgba: [0.4, 0.4, 0.4, 1.0] }));

        surface.unbind(&mut gpu);
        assert_eq!(gpu.bound_texture(BASE_COLOR_UNIT), None);
    }

    #[test]
    fn unchanged_texture_is_uploaded_once() {
        let texture = Texture::load(vec![1, 2, 3, 4], 2, 2, PixelFormat::Luma8).unwrap();
        let mut gpu = RecordingBackend::new();
        let mut surface = Fpl::new(texture.clone(), 0.0).unwrap();
        surface.bind(&mut gpu).unwrap();
        surface.bind(&mut gpu).unwrap();
        let uploads = |gpu: &RecordingBackend| {
            gpu.commands()
                .iter()
                .filter(|c| {
                    matches!(c, Command::CreateTexture { .. } | Command::UpdateTexture { .. })
                })
                .count()
        };
        assert_eq!(uploads(&gpu), 1);

        texture
            .reset(image::DynamicImage::ImageLuma8(image::GrayImage::new(2, 2)))
            .unwrap();
        surface.bind(&mut gpu).unwrap();
        assert_eq!(uploads(&gpu), 2);
    }

    #[test]
    fn release_is_idempotent_and_blocks_rendering() {
        let texture = Texture::load(vec![9; 4], 1, 1, PixelFormat::Rgba8).unwrap();
        let mut gpu = RecordingBackend::new();
        let mut surface = Fpl::new(texture, 0.0).unwrap();
        surface.bind(&mut gpu).unwrap();
        surface.release(&mut gpu);
        surface.release(&mut gpu);
        assert_eq!(gpu.live_textures(), 0);
        let err = surface
            .render(&mut gpu, Topology::Triangles, &triangle())
            .unwrap_err();
        assert!(matches!(err, ShadingError::Released(id) if id == surface.id()));
        assert!(surface.bind(&mut gpu).is_err());
    }

    #[test]
    fn attribute_buffers_are_rejected() {
        let surface = Fpl::new(MixChannel::solid([1.0; 4]).unwrap(), 0.0).unwrap();
        let err = surface
            .validate_vertices(&VertexData::Attributes(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, ShadingError::InvalidArgument(_)));
    }
}
