//! Decoding, alpha normalization and PNG encoding.
//!
//! Every stage downstream of [`normalize`] works on the same canonical form:
//! an 8-bit straight-alpha RGBA [`Raster`] with the input's dimensions.

use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};

use crate::error::{Error, Result};

/// Canonical 4-channel raster used by every stage after normalization.
pub type Raster = RgbaImage;

/// Input formats accepted by [`normalize`].
pub const SUPPORTED_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Decode `bytes` into the canonical raster.
///
/// The format is sniffed from the content, not from any file name. Sources
/// without an alpha channel come out fully opaque.
///
/// # Errors
///
/// Returns [`Error::UnsupportedFormat`] if the format is not JPEG, PNG or
/// WebP, or if decoding fails.
pub fn normalize(bytes: &[u8]) -> Result<Raster> {
    let format =
        image::guess_format(bytes).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(Error::UnsupportedFormat(format!("{format:?}")));
    }

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| Error::UnsupportedFormat(format!("{format:?}: {e}")))?;
    let had_alpha = decoded.color().has_alpha();
    let raster = decoded.to_rgba8();

    log::debug!(
        "normalized {format:?} input to {}x{} RGBA (source alpha: {had_alpha})",
        raster.width(),
        raster.height()
    );
    Ok(raster)
}

/// Encode a raster as PNG, keeping its alpha channel.
///
/// # Errors
///
/// Returns [`Error::Image`] if the encoder fails.
pub fn encode_png(raster: &Raster) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    raster.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Foreground-membership mask: one alpha byte per pixel.
///
/// 255 marks certain foreground, 0 certain background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    alpha: GrayImage,
}

impl Mask {
    /// Wrap a single-channel alpha plane.
    #[must_use]
    pub fn from_alpha(alpha: GrayImage) -> Self {
        Self { alpha }
    }

    /// A mask of the given size with every pixel set to `value`.
    #[must_use]
    pub fn uniform(width: u32, height: u32, value: u8) -> Self {
        Self {
            alpha: GrayImage::from_pixel(width, height, image::Luma([value])),
        }
    }

    /// Build a mask from a segmenter's output image.
    ///
    /// Uses the alpha channel when the image has one, its luminance otherwise.
    #[must_use]
    pub fn from_image(image: &DynamicImage) -> Self {
        if image.color().has_alpha() {
            let rgba = image.to_rgba8();
            let alpha = GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
                image::Luma([rgba.get_pixel(x, y)[3]])
            });
            Self { alpha }
        } else {
            Self {
                alpha: image.to_luma8(),
            }
        }
    }

    /// Decode a mask from encoded image bytes (any format `image` can sniff).
    ///
    /// # Errors
    ///
    /// Returns [`Error::SegmentationFailed`] if the bytes are not a decodable image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::SegmentationFailed(format!("undecodable mask: {e}")))?;
        Ok(Self::from_image(&image))
    }

    /// Mask width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.alpha.width()
    }

    /// Mask height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.alpha.height()
    }

    /// `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.alpha.dimensions()
    }

    /// Alpha value at `(x, y)`.
    #[must_use]
    pub fn alpha_at(&self, x: u32, y: u32) -> u8 {
        self.alpha.get_pixel(x, y)[0]
    }

    /// Raw alpha plane, row-major.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.alpha.as_raw()
    }
}

/// Encoded output of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeResult {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl CompositeResult {
    pub(crate) fn new(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            width,
            height,
        }
    }

    /// PNG-encoded bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the result, returning the PNG bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the encoded buffer is empty (never true for a successful run).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `(width, height)` of the encoded image.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The PNG as a `data:image/png;base64,...` URL.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:image/png;base64,{encoded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba};

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[allow(clippy::cast_possible_truncation)]
    fn opaque_source() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(16, 12, |x, y| {
            Rgb([(x * 15) as u8, (y * 20) as u8, 90])
        }))
    }

    #[test]
    fn opaque_sources_become_fully_opaque_rasters() {
        for format in SUPPORTED_FORMATS {
            let bytes = encode(&opaque_source(), format);
            let raster = normalize(&bytes).unwrap();
            assert_eq!(raster.dimensions(), (16, 12), "{format:?}");
            assert!(
                raster.pixels().all(|p| p[3] == 255),
                "{format:?} should normalize to opaque alpha"
            );
        }
    }

    #[test]
    fn png_alpha_is_preserved() {
        let mut src = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        src.put_pixel(1, 2, Rgba([10, 20, 30, 40]));
        let bytes = encode(&DynamicImage::ImageRgba8(src.clone()), ImageFormat::Png);
        assert_eq!(normalize(&bytes).unwrap(), src);
    }

    #[test]
    fn garbage_is_unsupported() {
        let err = normalize(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn recognized_but_unsupported_format_is_rejected() {
        let bytes = encode(&opaque_source(), ImageFormat::Bmp);
        let err = normalize(&bytes).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ref m) if m.contains("Bmp")));
    }

    #[test]
    fn truncated_png_is_unsupported() {
        let bytes = encode(&opaque_source(), ImageFormat::Png);
        let err = normalize(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn mask_prefers_alpha_over_luminance() {
        let rgba = RgbaImage::from_pixel(3, 3, Rgba([255, 255, 255, 7]));
        let mask = Mask::from_image(&DynamicImage::ImageRgba8(rgba));
        assert!(mask.as_raw().iter().all(|&a| a == 7));

        let gray = GrayImage::from_pixel(3, 3, image::Luma([200]));
        let mask = Mask::from_image(&DynamicImage::ImageLuma8(gray));
        assert!(mask.as_raw().iter().all(|&a| a == 200));
    }

    #[test]
    fn data_url_has_png_prefix() {
        let png = encode_png(&RgbaImage::new(2, 2)).unwrap();
        let result = CompositeResult::new(png, 2, 2);
        assert!(result.to_data_url().starts_with("data:image/png;base64,iVBOR"));
        assert!(!result.is_empty());
    }
}
