//! Single-band channels and the four-slot channel compositor.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::error::{Result, ShadingError};
use crate::hash::{soft_update, Cacheable, ContentHash, HashBuilder};
use crate::texture::Texture;
use crate::types::{ChannelId, NodeId};

/// Quantizes a unit scalar to an 8-bit band value.
pub fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub(crate) fn validate_unit(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ShadingError::invalid(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

struct ChannelState {
    texture: Texture,
    channel: ChannelId,
    hash: ContentHash,
    band: Option<GrayImage>,
}

struct ChannelShared {
    id: NodeId,
    state: RefCell<ChannelState>,
}

/// One band of a texture, optionally resampled.
///
/// The channel shares the texture rather than owning its pixels; it only
/// caches the extracted band.
#[derive(Clone)]
pub struct Channel {
    shared: Rc<ChannelShared>,
}

impl Channel {
    pub fn new(texture: &Texture, channel: ChannelId) -> Self {
        let channel = Self {
            shared: Rc::new(ChannelShared {
                id: NodeId::next(),
                state: RefCell::new(ChannelState {
                    texture: texture.clone(),
                    channel,
                    hash: ContentHash::default(),
                    band: None,
                }),
            }),
        };
        channel.update();
        channel
    }

    /// Same as [`Channel::new`] with a numeric band index (0=R .. 3=A).
    pub fn from_index(texture: &Texture, index: u32) -> Result<Self> {
        Ok(Self::new(texture, ChannelId::from_index(index)?))
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn channel(&self) -> ChannelId {
        self.shared.state.borrow().channel
    }

    pub fn texture(&self) -> Texture {
        self.shared.state.borrow().texture.clone()
    }

    /// Returns the band, resampled bilinearly when `size` differs from the
    /// source resolution.
    pub fn band(&self, size: Option<(u32, u32)>) -> GrayImage {
        if self.is_stale() {
            self.update();
        }
        let mut guard = self.shared.state.borrow_mut();
        let ChannelState {
            texture,
            channel,
            band,
            ..
        } = &mut *guard;
        let band = band
            .get_or_insert_with(|| texture.extract_channel(*channel))
            .clone();
        drop(guard);
        match size {
            Some((width, height)) if (width, height) != band.dimensions() => {
                imageops::resize(&band, width, height, FilterType::Triangle)
            }
            _ => band,
        }
    }

    /// Replaces the texture and/or band; `None` keeps the current value.
    pub fn reset(&self, texture: Option<&Texture>, channel: Option<ChannelId>) {
        {
            let mut state = self.shared.state.borrow_mut();
            if let Some(texture) = texture {
                state.texture = texture.clone();
            }
            if let Some(channel) = channel {
                state.channel = channel;
            }
        }
        self.update();
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Cacheable for Channel {
    fn node_id(&self) -> NodeId {
        self.shared.id
    }

    fn get_hash(&self) -> ContentHash {
        let state = self.shared.state.borrow();
        HashBuilder::new("channel")
            .child(state.texture.get_hash())
            .u8(state.channel.index() as u8)
            .finish()
    }

    fn cached_hash(&self) -> ContentHash {
        self.shared.state.borrow().hash
    }

    fn update(&self) {
        let hash = self.get_hash();
        let mut state = self.shared.state.borrow_mut();
        state.band = None;
        state.hash = hash;
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Cacheable)) {
        let texture = self.texture();
        visit(&texture);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("texture", &state.texture.id())
            .field("channel", &state.channel)
            .finish()
    }
}

/// A scalar input: either a constant in `[0, 1]` or a texture channel.
#[derive(Clone, Debug)]
pub enum ScalarSource {
    Constant(f32),
    Channel(Channel),
}

impl ScalarSource {
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        match self {
            ScalarSource::Constant(value) => validate_unit(name, *value),
            ScalarSource::Channel(_) => Ok(()),
        }
    }

    pub(crate) fn hash_into(&self, builder: HashBuilder) -> HashBuilder {
        match self {
            ScalarSource::Constant(value) => builder.u8(0).f32(*value),
            ScalarSource::Channel(channel) => builder.u8(1).child(channel.get_hash()),
        }
    }

    pub fn as_constant(&self) -> Option<f32> {
        match self {
            ScalarSource::Constant(value) => Some(*value),
            ScalarSource::Channel(_) => None,
        }
    }
}

impl From<f32> for ScalarSource {
    fn from(value: f32) -> Self {
        ScalarSource::Constant(value)
    }
}

impl From<f64> for ScalarSource {
    fn from(value: f64) -> Self {
        ScalarSource::Constant(value as f32)
    }
}

impl From<Channel> for ScalarSource {
    fn from(channel: Channel) -> Self {
        ScalarSource::Channel(channel)
    }
}

impl From<&Channel> for ScalarSource {
    fn from(channel: &Channel) -> Self {
        ScalarSource::Channel(channel.clone())
    }
}

const SLOT_NAMES: [&str; 4] = ["R", "G", "B", "A"];

struct MixState {
    size: (u32, u32),
    slots: [ScalarSource; 4],
    image: RgbaImage,
    hash: ContentHash,
    recompositions: u64,
}

struct MixShared {
    id: NodeId,
    state: RefCell<MixState>,
}

/// Composite RGBA raster assembled from four scalar sources.
///
/// All four bands are always populated. The composite is rebuilt eagerly on
/// construction and reset, and lazily by [`soft_update`] when an upstream
/// texture or channel changes.
#[derive(Clone)]
pub struct MixChannel {
    shared: Rc<MixShared>,
}

impl MixChannel {
    pub fn new(
        size: (u32, u32),
        r: impl Into<ScalarSource>,
        g: impl Into<ScalarSource>,
        b: impl Into<ScalarSource>,
        a: impl Into<ScalarSource>,
    ) -> Result<Self> {
        Self::from_slots(size, [r.into(), g.into(), b.into(), a.into()])
    }

    /// Composite with a fully opaque alpha band.
    pub fn rgb(
        size: (u32, u32),
        r: impl Into<ScalarSource>,
        g: impl Into<ScalarSource>,
        b: impl Into<ScalarSource>,
    ) -> Result<Self> {
        Self::new(size, r, g, b, 1.0)
    }

    /// 1x1 composite of constants.
    pub fn solid(rgba: [f32; 4]) -> Result<Self> {
        Self::new((1, 1), rgba[0], rgba[1], rgba[2], rgba[3])
    }

    pub fn builder(size: (u32, u32)) -> MixChannelBuilder {
        MixChannelBuilder {
            size,
            slots: [None, None, None, None],
        }
    }

    fn from_slots(size: (u32, u32), slots: [ScalarSource; 4]) -> Result<Self> {
        validate_size(size)?;
        for (slot, name) in slots.iter().zip(SLOT_NAMES) {
            slot.validate(name)?;
        }
        let mix = Self {
            shared: Rc::new(MixShared {
                id: NodeId::next(),
                state: RefCell::new(MixState {
                    size,
                    slots,
                    image: RgbaImage::new(size.0, size.1),
                    hash: ContentHash::default(),
                    recompositions: 0,
                }),
            }),
        };
        mix.update();
        Ok(mix)
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn size(&self) -> (u32, u32) {
        self.shared.state.borrow().size
    }

    pub fn slot(&self, channel: ChannelId) -> ScalarSource {
        self.shared.state.borrow().slots[channel.index()].clone()
    }

    /// Number of times the composite raster has been rebuilt.
    pub fn recompositions(&self) -> u64 {
        self.shared.state.borrow().recompositions
    }

    /// The composite raster, brought up to date first if any input changed.
    pub fn image(&self) -> Ref<'_, RgbaImage> {
        soft_update(self);
        Ref::map(self.shared.state.borrow(), |state| &state.image)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let image = self.image();
        if x < image.width() && y < image.height() {
            Some(image.get_pixel(x, y).0)
        } else {
            None
        }
    }

    /// All four slots as constants, when no slot samples a texture.
    pub fn constant_color(&self) -> Option<[f32; 4]> {
        let state = self.shared.state.borrow();
        let mut rgba = [0.0; 4];
        for (value, slot) in rgba.iter_mut().zip(state.slots.iter()) {
            *value = slot.as_constant()?;
        }
        Some(rgba)
    }

    /// Replaces the size and/or any slots; `None` keeps the current value.
    ///
    /// Everything is validated before anything is applied.
    pub fn reset(
        &self,
        size: Option<(u32, u32)>,
        r: Option<ScalarSource>,
        g: Option<ScalarSource>,
        b: Option<ScalarSource>,
        a: Option<ScalarSource>,
    ) -> Result<()> {
        if let Some(size) = size {
            validate_size(size)?;
        }
        let replacements = [r, g, b, a];
        for (slot, name) in replacements.iter().zip(SLOT_NAMES) {
            if let Some(slot) = slot {
                slot.validate(name)?;
            }
        }
        {
            let mut state = self.shared.state.borrow_mut();
            if let Some(size) = size {
                state.size = size;
            }
            for (current, replacement) in state.slots.iter_mut().zip(replacements) {
                if let Some(replacement) = replacement {
                    *current = replacement;
                }
            }
        }
        self.update();
        Ok(())
    }

    pub fn ptr_eq(&self, other: &MixChannel) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    fn compose(size: (u32, u32), slots: &[ScalarSource; 4]) -> RgbaImage {
        let (width, height) = size;
        let bands: Vec<GrayImage> = slots
            .iter()
            .map(|slot| match slot {
                ScalarSource::Constant(value) => {
                    GrayImage::from_pixel(width, height, Luma([quantize(*value)]))
                }
                ScalarSource::Channel(channel) => channel.band(Some(size)),
            })
            .collect();
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([
                bands[0].get_pixel(x, y)[0],
                bands[1].get_pixel(x, y)[0],
                bands[2].get_pixel(x, y)[0],
                bands[3].get_pixel(x, y)[0],
            ])
        })
    }
}

fn validate_size(size: (u32, u32)) -> Result<()> {
    if size.0 == 0 || size.1 == 0 {
        return Err(ShadingError::invalid(format!(
            "composite size must be non-zero, got {}x{}",
            size.0, size.1
        )));
    }
    Ok(())
}

impl Cacheable for MixChannel {
    fn node_id(&self) -> NodeId {
        self.shared.id
    }

    fn get_hash(&self) -> ContentHash {
        let state = self.shared.state.borrow();
        let builder = HashBuilder::new("mix")
            .u32(state.size.0)
            .u32(state.size.1);
        state
            .slots
            .iter()
            .fold(builder, |builder, slot| slot.hash_into(builder))
            .finish()
    }

    fn cached_hash(&self) -> ContentHash {
        self.shared.state.borrow().hash
    }

    fn update(&self) {
        let (size, slots) = {
            let state = self.shared.state.borrow();
            (state.size, state.slots.clone())
        };
        let image = Self::compose(size, &slots);
        let hash = self.get_hash();
        let mut state = self.shared.state.borrow_mut();
        state.image = image;
        state.hash = hash;
        state.recompositions += 1;
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&dyn Cacheable)) {
        let slots = self.shared.state.borrow().slots.clone();
        for slot in &slots {
            if let ScalarSource::Channel(channel) = slot {
                visit(channel);
            }
        }
    }
}

impl fmt::Debug for MixChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("MixChannel")
            .field("id", &self.shared.id)
            .field("size", &state.size)
            .field("slots", &state.slots)
            .finish()
    }
}

/// Slot-by-slot construction of a [`MixChannel`].
///
/// Red, green and blue are mandatory; alpha defaults to fully opaque.
pub struct MixChannelBuilder {
    size: (u32, u32),
    slots: [Option<ScalarSource>; 4],
}

impl MixChannelBuilder {
    pub fn red(mut self, source: impl Into<ScalarSource>) -> Self {
        self.slots[0] = Some(source.into());
        self
    }

    pub fn green(mut self, source: impl Into<ScalarSource>) -> Self {
        self.slots[1] = Some(source.into());
        self
    }

    pub fn blue(mut self, source: impl Into<ScalarSource>) -> Self {
        self.slots[2] = Some(source.into());
        self
    }

    pub fn alpha(mut self, source: impl Into<ScalarSource>) -> Self {
        self.slots[3] = Some(source.into());
        self
    }

    pub fn build(self) -> Result<MixChannel> {
        let [r, g, b, a] = self.slots;
        let missing = |name: &str| {
            ShadingError::invalid(format!("composite is missing its {name} channel"))
        };
        let r = r.ok_or_else(|| missing("R"))?;
        let g = g.ok_or_else(|| missing("G"))?;
        let b = b.ok_or_else(|| missing("B"))?;
        let a = a.unwrap_or(ScalarSource::Constant(1.0));
        MixChannel::from_slots(self.size, [r, g, b, a])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::PixelFormat;

    fn gradient() -> Texture {
        // 2x1 RGB: black then white.
        Texture::load(vec![0, 0, 0, 255, 255, 255], 2, 1, PixelFormat::Rgb8).unwrap()
    }

    #[test]
    fn scalar_bands_round_to_eight_bits() {
        for value in [0.0_f32, 0.1, 0.2, 0.5, 0.502, 0.7, 0.999, 1.0] {
            let mix = MixChannel::rgb((1, 1), value, value, value).unwrap();
            let pixel = mix.pixel(0, 0).unwrap();
            assert_eq!(pixel[0], (value * 255.0).round() as u8, "value {value}");
            assert_eq!(pixel[3], 255);
        }
    }

    #[test]
    fn out_of_range_scalars_are_rejected() {
        for value in [-0.01_f32, 1.01, f32::NAN, f32::INFINITY] {
            let err = MixChannel::rgb((1, 1), value, 0.0, 0.0).unwrap_err();
            assert!(matches!(err, ShadingError::InvalidArgument(_)));
        }
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(MixChannel::rgb((0, 2), 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn builder_requires_color_bands_and_defaults_alpha() {
        let err = MixChannel::builder((1, 1)).red(1.0).green(1.0).build().unwrap_err();
        assert!(matches!(err, ShadingError::InvalidArgument(_)));

        let mix = MixChannel::builder((1, 1))
            .red(0.0)
            .green(0.0)
            .blue(1.0)
            .build()
            .unwrap();
        assert_eq!(mix.pixel(0, 0), Some([0, 0, 255, 255]));
    }

    #[test]
    fn channel_inputs_are_resampled_bilinearly() {
        let texture = gradient();
        let red = Channel::new(&texture, ChannelId::R);
        let mix = MixChannel::rgb((4, 1), &red, 0.0, 0.0).unwrap();
        let image = mix.image();
        let row: Vec<u8> = (0..4).map(|x| image.get_pixel(x, 0)[0]).collect();
        assert_eq!(row[0], 0);
        assert_eq!(row[3], 255);
        assert!(row[1] > 0 && row[1] < row[2] && row[2] < 255, "row {row:?}");
    }

    #[test]
    fn hash_is_stable_without_mutation() {
        let mix = MixChannel::rgb((2, 2), 0.3, 0.2, 0.1).unwrap();
        let first = mix.get_hash();
        let second = mix.get_hash();
        assert_eq!(first, second);
        assert!(!mix.is_stale());
    }

    #[test]
    fn soft_update_recomposes_once_after_upstream_reset() {
        let texture = gradient();
        let mix = MixChannel::rgb((2, 1), Channel::new(&texture, ChannelId::R), 0.0, 0.0).unwrap();
        assert_eq!(mix.recompositions(), 1);

        assert!(!soft_update(&mix));
        assert_eq!(mix.recompositions(), 1);

        texture
            .reset(image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                2,
                1,
                image::Rgb([128, 0, 0]),
            )))
            .unwrap();
        assert!(mix.is_stale());
        assert!(soft_update(&mix));
        assert!(!soft_update(&mix));
        assert_eq!(mix.recompositions(), 2);
        assert_eq!(mix.pixel(1, 0), Some([128, 0, 0, 255]));
    }

    #[test]
    fn reading_pixels_never_returns_stale_data() {
        let texture = gradient();
        let mix = MixChannel::rgb((2, 1), 0.0, Channel::new(&texture, ChannelId::G), 0.0).unwrap();
        texture
            .reset(image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                2,
                1,
                image::Rgb([0, 42, 0]),
            )))
            .unwrap();
        assert_eq!(mix.pixel(0, 0), Some([0, 42, 0, 255]));
    }

    #[test]
    fn reset_validates_before_applying() {
        let mix = MixChannel::rgb((1, 1), 0.5, 0.5, 0.5).unwrap();
        let before = mix.get_hash();
        let err = mix
            .reset(Some((2, 2)), Some(ScalarSource::Constant(2.0)), None, None, None)
            .unwrap_err();
        assert!(matches!(err, ShadingError::InvalidArgument(_)));
        assert_eq!(mix.size(), (1, 1));
        assert_eq!(mix.get_hash(), before);

        mix.reset(
            None,
            None,
            None,
            Some(ScalarSource::Constant(1.0)),
            Some(ScalarSource::Constant(0.0)),
        )
        .unwrap();
        assert_eq!(mix.pixel(0, 0), Some([128, 128, 255, 0]));
    }

    #[test]
    fn constant_color_only_for_scalar_composites() {
        let mix = MixChannel::solid([1.0, 0.5, 0.0, 1.0]).unwrap();
        assert_eq!(mix.constant_color(), Some([1.0, 0.5, 0.0, 1.0]));
        let texture = gradient();
        let red = Channel::new(&texture, ChannelId::R);
        let textured = MixChannel::rgb((1, 1), red, 0.0, 0.0).unwrap();
        assert_eq!(textured.constant_color(), None);
    }
}
