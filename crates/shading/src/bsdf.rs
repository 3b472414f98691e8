use std::cell::Cell;
use std::fmt;

use image::{GrayImage, RgbaImage};

use crate::error::Result;
use crate::hash::{Cacheable, ContentHash, HashBuilder};
use crate::mix::{MixChannel, ScalarSource};
use crate::texture::Texture;
use crate::types::NodeId;

/// A full-color map input: a texture as-is or a composite.
#[derive(Clone, Debug)]
pub enum MapSource {
    Texture(Texture),
    Mix(MixChannel),
}

impl MapSource {
    pub fn to_rgba8(&self) -> RgbaImage {
        match self {
            MapSource::Texture(texture) => texture.to_rgba8(),
            MapSource::Mix(mix) => mix.image().clone(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self {
            MapSource::Texture(texture) => texture.size(),
            MapSource::Mix(mix) => mix.size(),
        }
    }

    /// Flat color when the map is a composite of constants only.
    pub fn constant_color(&self) -> Option<[f32; 4]> {
        match self {
            MapSource::Texture(_) => None,
            MapSource::Mix(mix) => mix.constant_color(),
        }
    }

    pub fn node(&self) -> &dyn Cacheable {
        match self {
            MapSource::Texture(texture) => texture,
            MapSource::Mix(mix) => mix,
        }
    }

    pub fn hash(&self) -> ContentHash {
        self.node().get_hash()
    }
}

impl From<Texture> for MapSource {
    fn from(texture: Texture) -> Self {
        MapSource::Texture(texture)
    }
}

impl From<MixChannel> for MapSource {
    fn from(mix: MixChannel) -> Self {
        MapSource::Mix(mix)
    }
}

/// Expands a single band into an opaque grey RGBA raster for upload.
pub(crate) fn band_to_rgba(band: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(band.width(), band.height(), |x, y| {
        let value = band.get_pixel(x, y)[0];
        image::Rgba([value, value, value, 255])
    })
}

/// Material description consumed by the programmable surface.
///
/// Smoothness and emission are either constants or a single texture band.
/// The normal map defaults to a flat tangent-space normal.
#[derive(Clone)]
pub struct Bsdf {
    id: NodeId,
    base_color: MapSource,
    smoothness: ScalarSource,
    normal: MapSource,
    emission: ScalarSource,
    hash: Cell<ContentHash>,
}

impl Bsdf {
    pub fn new(
        base_color: impl Into<MapSource>,
        smoothness: impl Into<ScalarSource>,
        normal: Option<MapSource>,
        emission: impl Into<ScalarSource>,
    ) -> Result<Self> {
        let smoothness = smoothness.into();
        let emission = emission.into();
        smoothness.validate("smoothness")?;
        emission.validate("emission")?;
        let normal = match normal {
            Some(normal) => normal,
            None => MapSource::Mix(MixChannel::rgb((1, 1), 0.5, 0.5, 1.0)?),
        };
        let bsdf = Self {
            id: NodeId::next(),
            base_color: base_color.into(),
            smoothness,
            normal,
            emission,
            hash: Cell::new(ContentHash::default()),
        };
        bsdf.update();
        Ok(bsdf)
    }

    /// Plain diffuse material: no specular, flat normal, no emission.
    pub fn diffuse(base_color: impl Into<MapSource>) -> Result<Self> {
        Self::new(base_color, 0.0, None, 0.0)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn base_color(&self) -> &MapSource {
        &self.base_color
    }

    pub fn smoothness(&self) -> &ScalarSource {
        &self.smoothness
    }

    pub fn normal(&self) -> &MapSource {
        &self.normal
    }

    pub fn emission(&self) -> &ScalarSource {
        &self.emission
    }

    /// Replaces any subset of inputs; `None` keeps the current value.
    pub fn reset(
        &mut self,
        base_color: Option<MapSource>,
        smoothness: Option<ScalarSource>,
        normal: Option<MapSource>,
        emission: Option<ScalarSource>,
    ) -> Result<()> {
        if let Some(smoothness) = &smoothness {
            smoothness.validate("smoothness")?;
        }
        if let Some(emission) = &emission {
            emission.validate("emission")?;
        }
        if let Some(base_color) = base_color {
            self.base_color = base_color;
        }
        if let Some(smoothness) = smoothness {
            self.smoothness = smoothness;
        }
        if let Some(normal) = normal {
            self.normal = normal;
        }
        if let Some(emission) = emission {
            self.emission = emission;
        }
        self.update();
        Ok(())
    }

    pub(crate) fn base_color_image(&self) -> RgbaImage {
        self.base_color.to_rgba8()
    }

    pub(crate) fn normal_image(&self) -> RgbaImage {
        self.normal.to_rgba8()
    }
}

impl Cacheable for Bsdf {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn get_hash(&self) -> ContentHash {
        let builder = HashBuilder::new("bsdf")
            .child(self.base_color.hash())
            .child(self.normal.hash());
        let builder = self.smoothness.hash_into(builder);
        self.emission.hash_into(builder).finish()
    }

    fn cached_hash(&self) -> ContentHash {
        self.hash.get()
    }

    fn update(&self) {
        self.hash.set(self.get_hash());
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Cacheable)) {
        visit(self.base_color.node());
        visit(self.normal.node());
        if let ScalarSource::Channel(channel) = &self.smoothness {
            visit(channel);
        }
        if let ScalarSource::Channel(channel) = &self.emission {
            visit(channel);
        }
    }
}

impl fmt::Debug for Bsdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bsdf")
            .field("id", &self.id)
            .field("base_color", &self.base_color)
            .field("smoothness", &self.smoothness)
            .field("normal", &self.normal)
            .field("emission", &self.emission)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::soft_update;
    use crate::mix::Channel;
    use crate::texture::PixelFormat;
    use crate::types::ChannelId;
    use crate::ShadingError;

    #[test]
    fn default_normal_is_flat() {
        let bsdf = Bsdf::diffuse(MixChannel::solid([1.0, 1.0, 1.0, 1.0]).unwrap()).unwrap();
        assert_eq!(bsdf.normal_image().get_pixel(0, 0).0, [128, 128, 255, 255]);
    }

    #[test]
    fn rejects_out_of_range_scalars() {
        let base = MixChannel::solid([1.0, 1.0, 1.0, 1.0]).unwrap();
        let err = Bsdf::new(base, 1.5, None, 0.0).unwrap_err();
        assert!(matches!(err, ShadingError::InvalidArgument(_)));
    }

    #[test]
    fn smoothness_participates_in_hash() {
        let base = MixChannel::solid([1.0, 1.0, 1.0, 1.0]).unwrap();
        let mut bsdf = Bsdf::new(base, 0.2, None, 0.0).unwrap();
        let before = bsdf.get_hash();
        bsdf.reset(None, Some(ScalarSource::Constant(0.8)), None, None).unwrap();
        assert_ne!(before, bsdf.get_hash());
        assert!(!bsdf.is_stale());
    }

    #[test]
    fn soft_update_reaches_emission_channel() {
        let texture = Texture::load(vec![10, 20, 30], 1, 1, PixelFormat::Rgb8).unwrap();
        let emission = Channel::new(&texture, ChannelId::R);
        let bsdf = Bsdf::new(
            MixChannel::solid([1.0, 1.0, 1.0, 1.0]).unwrap(),
            0.0,
            None,
            emission,
        )
        .unwrap();
        assert!(!soft_update(&bsdf));

        texture
            .reset(image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                1,
                1,
                image::Rgb([99, 0, 0]),
            )))
            .unwrap();
        assert!(soft_update(&bsdf));
        assert!(!soft_update(&bsdf));
    }
}
