use std::cell::{Ref, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbaImage};

use crate::error::{Result, ShadingError};
use crate::hash::{Cacheable, ContentHash, HashBuilder};
use crate::types::{ChannelId, NodeId};

/// Pixel layout of a decoded raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Luma8,
    LumaA8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn bands(self) -> usize {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::LumaA8 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::LumaA8 | PixelFormat::Rgba8)
    }

    fn code(self) -> u8 {
        self.bands() as u8
    }
}

struct TextureState {
    image: DynamicImage,
    format: PixelFormat,
    hash: ContentHash,
}

struct TextureShared {
    id: NodeId,
    state: RefCell<TextureState>,
}

/// Shared handle to a decoded raster.
///
/// Cloning is cheap and every clone observes the same pixels, so a
/// [`reset`](Texture::reset) is visible to every channel built on top of it.
/// Pixels change only through `reset`, which rehashes them.
#[derive(Clone)]
pub struct Texture {
    shared: Rc<TextureShared>,
}

impl Texture {
    /// Wraps raw 8-bit pixel bytes laid out row-major in `format`.
    pub fn load(raw: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        Self::from_image(decode_raw(raw, width, height, format)?)
    }

    /// Wraps an already decoded image. Formats other than 8-bit
    /// L/LA/RGB/RGBA are converted to RGBA8.
    pub fn from_image(image: DynamicImage) -> Result<Self> {
        let (image, format) = normalize(image)?;
        let hash = hash_pixels(&image, format);
        Ok(Self {
            shared: Rc::new(TextureShared {
                id: NodeId::next(),
                state: RefCell::new(TextureState {
                    image,
                    format,
                    hash,
                }),
            }),
        })
    }

    /// Decodes an image file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|source| ShadingError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "decoded texture");
        Self::from_image(image)
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn width(&self) -> u32 {
        self.state().image.width()
    }

    pub fn height(&self) -> u32 {
        self.state().image.height()
    }

    pub fn size(&self) -> (u32, u32) {
        let state = self.state();
        (state.image.width(), state.image.height())
    }

    pub fn format(&self) -> PixelFormat {
        self.state().format
    }

    /// Digest over the raw pixel bytes, dimensions and format.
    pub fn content_hash(&self) -> ContentHash {
        self.state().hash
    }

    pub fn image(&self) -> Ref<'_, DynamicImage> {
        Ref::map(self.state(), |state| &state.image)
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        self.state().image.to_rgba8()
    }

    /// Extracts one band at native resolution.
    ///
    /// Alpha requested from a source without an alpha plane is a constant
    /// fully-opaque band, independent of the color content.
    pub fn extract_channel(&self, channel: ChannelId) -> GrayImage {
        let state = self.state();
        let (width, height) = (state.image.width(), state.image.height());
        if channel == ChannelId::A && !state.format.has_alpha() {
            return GrayImage::from_pixel(width, height, Luma([255]));
        }
        let rgba = state.image.to_rgba8();
        let index = channel.index();
        GrayImage::from_fn(width, height, |x, y| Luma([rgba.get_pixel(x, y)[index]]))
    }

    /// Replaces the pixels and rehashes them.
    pub fn reset(&self, image: DynamicImage) -> Result<()> {
        let (image, format) = normalize(image)?;
        let hash = hash_pixels(&image, format);
        let mut state = self.shared.state.borrow_mut();
        state.image = image;
        state.format = format;
        state.hash = hash;
        Ok(())
    }

    pub fn ptr_eq(&self, other: &Texture) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    fn state(&self) -> Ref<'_, TextureState> {
        self.shared.state.borrow()
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Texture")
            .field("id", &self.shared.id)
            .field("width", &state.image.width())
            .field("height", &state.image.height())
            .field("format", &state.format)
            .field("hash", &state.hash)
            .finish()
    }
}

impl Cacheable for Texture {
    fn node_id(&self) -> NodeId {
        self.shared.id
    }

    fn get_hash(&self) -> ContentHash {
        self.content_hash()
    }

    fn cached_hash(&self) -> ContentHash {
        self.content_hash()
    }

    fn update(&self) {
        let mut state = self.shared.state.borrow_mut();
        state.hash = hash_pixels(&state.image, state.format);
    }
}

fn decode_raw(raw: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<DynamicImage> {
    let expected = width as usize * height as usize * format.bands();
    if raw.len() != expected {
        return Err(ShadingError::invalid(format!(
            "{width}x{height} {format:?} raster needs {expected} bytes, got {}",
            raw.len()
        )));
    }
    let image = match format {
        PixelFormat::Luma8 => {
            ImageBuffer::from_raw(width, height, raw).map(DynamicImage::ImageLuma8)
        }
        PixelFormat::LumaA8 => {
            ImageBuffer::from_raw(width, height, raw).map(DynamicImage::ImageLumaA8)
        }
        PixelFormat::Rgb8 => ImageBuffer::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        PixelFormat::Rgba8 => {
            ImageBuffer::from_raw(width, height, raw).map(DynamicImage::ImageRgba8)
        }
    };
    image.ok_or_else(|| ShadingError::invalid("raster buffer does not match its dimensions"))
}

fn normalize(image: DynamicImage) -> Result<(DynamicImage, PixelFormat)> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ShadingError::invalid("texture dimensions must be non-zero"));
    }
    let normalized = match image {
        DynamicImage::ImageLuma8(_) => (image, PixelFormat::Luma8),
        DynamicImage::ImageLumaA8(_) => (image, PixelFormat::LumaA8),
        DynamicImage::ImageRgb8(_) => (image, PixelFormat::Rgb8),
        DynamicImage::ImageRgba8(_) => (image, PixelFormat::Rgba8),
        other => (DynamicImage::ImageRgba8(other.to_rgba8()), PixelFormat::Rgba8),
    };
    Ok(normalized)
}

fn hash_pixels(image: &DynamicImage, format: PixelFormat) -> ContentHash {
    HashBuilder::new("texture")
        .u32(image.width())
        .u32(image.height())
        .u8(format.code())
        .bytes(image.as_bytes())
        .finish()
}
