//! Image formatters: resize, fit, thumbnail and watermark.

use super::{FormattedFile, Formatter};
use crate::recipe::Options;
use crate::source::FileSource;
use crate::storage::Storage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};
use vermeer_error::{ConfigError, FormatterError, FormatterErrorKind, VermeerResult};

const FILTER: FilterType = FilterType::Lanczos3;

fn image_error(e: impl std::fmt::Display) -> FormatterError {
    FormatterError::new(FormatterErrorKind::Image(e.to_string()))
}

/// A decoded image plus the format it was read from.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    image: DynamicImage,
    format: Option<ImageFormat>,
}

impl ImageHandle {
    /// Wrap an already decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            format: None,
        }
    }

    /// Decode `bytes`, `None` when they are not a supported image.
    ///
    /// With `orientate`, EXIF orientation is applied so the pixels are
    /// upright.
    pub fn load(bytes: &[u8], orientate: bool) -> Option<Self> {
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
        let format = reader.format();
        let mut decoder = reader.into_decoder().ok()?;
        let orientation = if orientate { decoder.orientation().ok() } else { None };
        let mut image = DynamicImage::from_decoder(decoder).ok()?;
        if let Some(orientation) = orientation {
            image.apply_orientation(orientation);
        }
        Some(Self { image, format })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Format the image was decoded from.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    /// Decoded pixels.
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    fn with_image(&self, image: DynamicImage) -> Self {
        Self {
            image,
            format: self.format,
        }
    }

    /// Aspect-preserving resize to `width` and/or `height`.
    ///
    /// With both set the image fits inside the box. Without `upsize` images
    /// already smaller than the target keep their size.
    pub fn resize(&self, width: Option<u32>, height: Option<u32>, upsize: bool) -> Self {
        let (w, h) = (self.width().max(1) as f64, self.height().max(1) as f64);
        let scale = match (width, height) {
            (Some(tw), Some(th)) => (tw as f64 / w).min(th as f64 / h),
            (Some(tw), None) => tw as f64 / w,
            (None, Some(th)) => th as f64 / h,
            (None, None) => 1.0,
        };
        if (scale >= 1.0 && !upsize) || scale == 1.0 {
            return self.clone();
        }
        let nw = ((w * scale).round() as u32).max(1);
        let nh = ((h * scale).round() as u32).max(1);
        self.with_image(self.image.resize_exact(nw, nh, FILTER))
    }

    /// Scale and crop to exactly `width` x `height`.
    pub fn fit(&self, width: u32, height: u32) -> Self {
        self.with_image(self.image.resize_to_fill(width.max(1), height.max(1), FILTER))
    }

    /// Center the image on a `width` x `height` canvas filled with `background`.
    pub fn resize_canvas(&self, width: u32, height: u32, background: Rgba<u8>) -> Self {
        let mut canvas = RgbaImage::from_pixel(width.max(1), height.max(1), background);
        let x = (width as i64 - self.width() as i64) / 2;
        let y = (height as i64 - self.height() as i64) / 2;
        imageops::overlay(&mut canvas, &self.image.to_rgba8(), x, y);
        self.with_image(DynamicImage::ImageRgba8(canvas))
    }

    /// Composite `overlay` at `anchor`, offset inward by `x` and `y`.
    pub fn insert(&self, overlay: &ImageHandle, anchor: Anchor, x: i64, y: i64) -> Self {
        let (left, top) = anchor.position(
            (self.width(), self.height()),
            (overlay.width(), overlay.height()),
            (x, y),
        );
        let mut base = self.image.to_rgba8();
        imageops::overlay(&mut base, &overlay.image.to_rgba8(), left, top);
        self.with_image(DynamicImage::ImageRgba8(base))
    }

    /// Encode as `extension`, falling back to the source format, then PNG.
    ///
    /// Returns the bytes and the extension actually used.
    pub fn encode(&self, quality: u8, extension: Option<&str>) -> VermeerResult<(Vec<u8>, String)> {
        let format = extension
            .and_then(ImageFormat::from_extension)
            .or(self.format)
            .filter(|format| format.writing_enabled())
            .unwrap_or(ImageFormat::Png);
        let extension = match extension {
            Some(ext) if ImageFormat::from_extension(ext) == Some(format) => ext.to_ascii_lowercase(),
            _ => format.extensions_str().first().copied().unwrap_or("png").to_string(),
        };

        let mut buffer = Cursor::new(Vec::new());
        match format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
                DynamicImage::ImageRgb8(self.image.to_rgb8())
                    .write_with_encoder(encoder)
                    .map_err(image_error)?;
            }
            ImageFormat::Png => self.image.write_to(&mut buffer, format).map_err(image_error)?,
            _ => DynamicImage::ImageRgba8(self.image.to_rgba8())
                .write_to(&mut buffer, format)
                .map_err(image_error)?,
        }
        Ok((buffer.into_inner(), extension))
    }
}

/// Where a watermark is placed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Anchor {
    /// Top left corner
    TopLeft,
    /// Top edge, centered
    Top,
    /// Top right corner
    TopRight,
    /// Left edge, centered
    Left,
    /// Center
    Center,
    /// Right edge, centered
    Right,
    /// Bottom left corner
    BottomLeft,
    /// Bottom edge, centered
    Bottom,
    /// Bottom right corner
    #[default]
    BottomRight,
}

impl Anchor {
    /// Top-left position of an `inner` box inside `outer`, offset inward.
    pub fn position(&self, outer: (u32, u32), inner: (u32, u32), offset: (i64, i64)) -> (i64, i64) {
        let (ow, oh) = (outer.0 as i64, outer.1 as i64);
        let (iw, ih) = (inner.0 as i64, inner.1 as i64);
        let (dx, dy) = offset;

        let x = match self {
            Self::TopLeft | Self::Left | Self::BottomLeft => dx,
            Self::Top | Self::Center | Self::Bottom => (ow - iw) / 2 + dx,
            Self::TopRight | Self::Right | Self::BottomRight => ow - iw - dx,
        };
        let y = match self {
            Self::TopLeft | Self::Top | Self::TopRight => dy,
            Self::Left | Self::Center | Self::Right => (oh - ih) / 2 + dy,
            Self::BottomLeft | Self::Bottom | Self::BottomRight => oh - ih - dy,
        };
        (x, y)
    }
}

/// A second image composited onto the source.
#[derive(Debug, Clone)]
pub struct Watermark {
    image: ImageHandle,
    anchor: Anchor,
    x: i64,
    y: i64,
    reference: Option<(u32, u32)>,
}

impl Watermark {
    /// Watermark with `image` at the bottom-right corner.
    pub fn new(image: ImageHandle) -> Self {
        Self {
            image,
            anchor: Anchor::default(),
            x: 0,
            y: 0,
            reference: None,
        }
    }

    /// Load the watermark image from a local file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the file is unreadable or not an image.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> VermeerResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ConfigError::new(format!("Cannot read watermark {}: {}", path.display(), e))
        })?;
        let image = ImageHandle::load(&bytes, true).ok_or_else(|| {
            ConfigError::new(format!("Watermark {} is not a supported image", path.display()))
        })?;
        Ok(Self::new(image))
    }

    /// Placement anchor.
    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// Inward offsets from the anchor.
    pub fn with_offset(mut self, x: i64, y: i64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Source size the watermark and offsets were designed for.
    ///
    /// Sources of another size get a proportionally rescaled watermark.
    pub fn with_reference_size(mut self, width: u32, height: u32) -> Self {
        self.reference = Some((width.max(1), height.max(1)));
        self
    }

    /// Composite onto `target`.
    pub fn apply(&self, target: &ImageHandle) -> ImageHandle {
        match self.reference {
            Some((rw, rh)) if (rw, rh) != (target.width(), target.height()) => {
                let scale = (target.width() as f64 / rw as f64).min(target.height() as f64 / rh as f64);
                let width = ((self.image.width() as f64 * scale).round() as u32).max(1);
                let height = ((self.image.height() as f64 * scale).round() as u32).max(1);
                let scaled = self.image.with_image(self.image.image.resize_exact(width, height, FILTER));
                let x = (self.x as f64 * scale).round() as i64;
                let y = (self.y as f64 * scale).round() as i64;
                target.insert(&scaled, self.anchor, x, y)
            }
            _ => target.insert(&self.image, self.anchor, self.x, self.y),
        }
    }
}

/// Custom transform on a decoded image; `Ok(None)` declines.
pub type ImageFn = Arc<dyn Fn(ImageHandle) -> VermeerResult<Option<ImageHandle>> + Send + Sync>;

/// The geometric or compositing step of an [`ImageFormatter`].
#[derive(Clone)]
pub enum ImageOperation {
    /// Aspect-preserving resize
    Resize {
        /// Target width
        width: Option<u32>,
        /// Target height
        height: Option<u32>,
        /// Enlarge smaller images
        upsize: bool,
    },
    /// Scale and crop to exact dimensions
    Fit {
        /// Target width
        width: u32,
        /// Target height
        height: u32,
    },
    /// Resize into the box, then pad to exact dimensions
    Thumbnail {
        /// Canvas width
        width: u32,
        /// Canvas height
        height: u32,
        /// Padding color
        background: Rgba<u8>,
    },
    /// Composite a second image
    Watermark(Arc<Watermark>),
    /// Caller-supplied transform
    Custom(ImageFn),
}

impl std::fmt::Debug for ImageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resize { width, height, upsize } => f
                .debug_struct("Resize")
                .field("width", width)
                .field("height", height)
                .field("upsize", upsize)
                .finish(),
            Self::Fit { width, height } => {
                f.debug_struct("Fit").field("width", width).field("height", height).finish()
            }
            Self::Thumbnail { width, height, background } => f
                .debug_struct("Thumbnail")
                .field("width", width)
                .field("height", height)
                .field("background", background)
                .finish(),
            Self::Watermark(_) => f.write_str("Watermark"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl ImageOperation {
    fn apply(&self, handle: ImageHandle) -> VermeerResult<Option<ImageHandle>> {
        Ok(Some(match self {
            Self::Resize { width, height, upsize } => handle.resize(*width, *height, *upsize),
            Self::Fit { width, height } => handle.fit(*width, *height),
            Self::Thumbnail { width, height, background } => handle
                .resize(Some(*width), Some(*height), false)
                .resize_canvas(*width, *height, *background),
            Self::Watermark(watermark) => watermark.apply(&handle),
            Self::Custom(func) => return func(handle),
        }))
    }
}

/// Settings shared by all image formatters.
#[derive(Debug, Clone, PartialEq, Eq, derive_getters::Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct ImageOptions {
    /// Apply EXIF orientation before transforming
    orientate: bool,
    /// JPEG quality, 1 to 100
    quality: u8,
    /// Forced output extension
    extension: Option<String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            orientate: true,
            quality: 90,
            extension: None,
        }
    }
}

impl ImageOptions {
    /// Read `orientate`, `quality` and `extension` from recipe options.
    pub fn from_options(options: &Options) -> VermeerResult<Self> {
        let defaults = Self::default();
        let quality = match options.u32("quality")? {
            Some(q) if (1..=100).contains(&q) => q as u8,
            Some(q) => {
                return Err(ConfigError::new(format!("Quality must be 1 to 100, got {}", q)).into());
            }
            None => defaults.quality,
        };
        Ok(Self {
            orientate: options.bool("orientate")?.unwrap_or(defaults.orientate),
            quality,
            extension: options.string("extension")?,
        })
    }
}

fn parse_color(hex: &str) -> Option<[u8; 3]> {
    let hex = hex.trim().trim_start_matches('#');
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(expanded.get(i..i + 2)?, 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

fn parse_dimensions(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Formatter decoding the source as an image and applying one operation.
///
/// Declines when the source is not a decodable image.
#[derive(Debug, Clone)]
pub struct ImageFormatter {
    operation: ImageOperation,
    options: ImageOptions,
}

impl ImageFormatter {
    /// Formatter applying `operation`.
    pub fn new(operation: ImageOperation, options: ImageOptions) -> Self {
        Self { operation, options }
    }

    /// `resize` recipe: `width` and/or `height`, optional `upsize`.
    pub fn resize(options: &Options) -> VermeerResult<Self> {
        let width = options.u32("width")?;
        let height = options.u32("height")?;
        if width.is_none() && height.is_none() {
            return Err(ConfigError::new("resize needs 'width' or 'height'").into());
        }
        Ok(Self::new(
            ImageOperation::Resize {
                width,
                height,
                upsize: options.bool("upsize")?.unwrap_or(false),
            },
            ImageOptions::from_options(options)?,
        ))
    }

    /// `fit` recipe: `width` and `height`.
    pub fn fit(options: &Options) -> VermeerResult<Self> {
        Ok(Self::new(
            ImageOperation::Fit {
                width: options.required_u32("width")?,
                height: options.required_u32("height")?,
            },
            ImageOptions::from_options(options)?,
        ))
    }

    /// `thumbnail` recipe: `width`, `height`, optional `background` hex and
    /// `alpha` (0.0 transparent to 1.0 opaque).
    pub fn thumbnail(options: &Options) -> VermeerResult<Self> {
        let background = options.string("background")?.unwrap_or_else(|| "#ffffff".to_string());
        let [r, g, b] = parse_color(&background)
            .ok_or_else(|| ConfigError::new(format!("Invalid background color '{}'", background)))?;
        let alpha = options.f64("alpha")?.unwrap_or(0.0).clamp(0.0, 1.0);
        Ok(Self::new(
            ImageOperation::Thumbnail {
                width: options.required_u32("width")?,
                height: options.required_u32("height")?,
                background: Rgba([r, g, b, (alpha * 255.0).round() as u8]),
            },
            ImageOptions::from_options(options)?,
        ))
    }

    /// `watermark` recipe: `image` path, optional `anchor`, `x`, `y` and
    /// reference `size` (`"WxH"`).
    pub fn watermark(options: &Options) -> VermeerResult<Self> {
        let mut watermark = Watermark::from_file(options.required_string("image")?)?;
        if let Some(anchor) = options.string("anchor")? {
            let anchor = Anchor::from_str(&anchor)
                .map_err(|_| ConfigError::new(format!("Unknown watermark anchor '{}'", anchor)))?;
            watermark = watermark.with_anchor(anchor);
        }
        watermark = watermark.with_offset(
            options.i64("x")?.unwrap_or(0),
            options.i64("y")?.unwrap_or(0),
        );
        if let Some(size) = options.string("size")? {
            let (width, height) = parse_dimensions(&size)
                .ok_or_else(|| ConfigError::new(format!("Invalid watermark size '{}'", size)))?;
            watermark = watermark.with_reference_size(width, height);
        }
        Ok(Self::new(
            ImageOperation::Watermark(Arc::new(watermark)),
            ImageOptions::from_options(options)?,
        ))
    }

    /// Formatter running a custom image transform.
    pub fn custom(func: ImageFn) -> Self {
        Self::new(ImageOperation::Custom(func), ImageOptions::default())
    }

    /// Operation applied.
    pub fn operation(&self) -> &ImageOperation {
        &self.operation
    }
}

#[async_trait::async_trait]
impl Formatter for ImageFormatter {
    #[instrument(skip_all, fields(operation = ?self.operation))]
    async fn format(
        &self,
        source: &FileSource,
        _storage: &Arc<Storage>,
    ) -> VermeerResult<Option<FormattedFile>> {
        let contents = source.contents(None).await?;
        let operation = self.operation.clone();
        let options = self.options.clone();

        let encoded = tokio::task::spawn_blocking(move || -> VermeerResult<Option<(Vec<u8>, String)>> {
            let Some(handle) = ImageHandle::load(&contents, options.orientate) else {
                return Ok(None);
            };
            match operation.apply(handle)? {
                Some(output) => output
                    .encode(options.quality, options.extension.as_deref())
                    .map(Some),
                None => Ok(None),
            }
        })
        .await
        .map_err(image_error)??;

        match encoded {
            Some((bytes, extension)) => FormattedFile::from_contents(&bytes, Some(&extension))
                .await
                .map(Some),
            None => {
                debug!("Source is not a supported image, declining");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(width: u32, height: u32) -> ImageHandle {
        ImageHandle::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([10, 20, 30, 255]),
        )))
    }

    #[test]
    fn test_anchor_parsing() {
        assert_eq!(Anchor::from_str("top-left").unwrap(), Anchor::TopLeft);
        assert_eq!(Anchor::from_str("center").unwrap(), Anchor::Center);
        assert!(Anchor::from_str("middle").is_err());
    }

    #[test]
    fn test_anchor_position() {
        assert_eq!(Anchor::BottomRight.position((100, 50), (10, 10), (5, 5)), (85, 35));
        assert_eq!(Anchor::Center.position((100, 50), (10, 10), (0, 0)), (45, 20));
        assert_eq!(Anchor::TopLeft.position((100, 50), (10, 10), (2, 3)), (2, 3));
    }

    #[test]
    fn test_resize_preserves_aspect() {
        let resized = handle(400, 200).resize(Some(100), None, false);
        assert_eq!((resized.width(), resized.height()), (100, 50));

        let boxed = handle(400, 200).resize(Some(100), Some(100), false);
        assert_eq!((boxed.width(), boxed.height()), (100, 50));
    }

    #[test]
    fn test_resize_without_upsize() {
        let small = handle(50, 40).resize(Some(100), None, false);
        assert_eq!((small.width(), small.height()), (50, 40));

        let enlarged = handle(50, 40).resize(Some(100), None, true);
        assert_eq!((enlarged.width(), enlarged.height()), (100, 80));
    }

    #[test]
    fn test_thumbnail_pads_canvas() {
        let operation = ImageOperation::Thumbnail {
            width: 60,
            height: 60,
            background: Rgba([255, 255, 255, 0]),
        };
        let thumb = operation.apply(handle(120, 60)).unwrap().unwrap();
        assert_eq!((thumb.width(), thumb.height()), (60, 60));
    }

    #[test]
    fn test_watermark_reference_scaling() {
        let watermark = Watermark::new(handle(20, 20)).with_reference_size(200, 200);
        let output = watermark.apply(&handle(100, 100));
        assert_eq!((output.width(), output.height()), (100, 100));
    }

    #[test]
    fn test_encode_and_reload() {
        let (bytes, extension) = handle(8, 8).encode(80, Some("jpg")).unwrap();
        assert_eq!(extension, "jpg");
        let loaded = ImageHandle::load(&bytes, true).unwrap();
        assert_eq!(loaded.format(), Some(ImageFormat::Jpeg));
        assert!(ImageHandle::load(b"not an image", true).is_none());
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_color("#fff"), Some([255, 255, 255]));
        assert_eq!(parse_color("102030"), Some([16, 32, 48]));
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_dimensions("1200x800"), Some((1200, 800)));
        assert_eq!(parse_dimensions("1200"), None);
    }
}
