use image::{ColorType, GenericImageView, ImageFormat};

use super::types::{ImageDecoder, ImageMeta};
use super::ExtractionError;

/// Decodes raster images with the `image` crate and reports their shape.
pub struct RasterDecoder;

impl ImageDecoder for RasterDecoder {
    fn decode_image_meta(&self, bytes: &[u8]) -> Result<ImageMeta, ExtractionError> {
        let format = image::guess_format(bytes)
            .map_err(|e| ExtractionError::ImageProcessing(format!("Unknown image format: {e}")))?;

        let img = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| ExtractionError::ImageProcessing(format!("Failed to decode image: {e}")))?;

        let (width, height) = img.dimensions();
        Ok(ImageMeta {
            width,
            height,
            mode: color_mode(img.color()).to_string(),
            format: format_name(format).to_string(),
        })
    }
}

/// PIL-style mode names, which is what the report prompt has always shown.
fn color_mode(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 | ColorType::L16 => "L",
        ColorType::La8 | ColorType::La16 => "LA",
        ColorType::Rgb8 | ColorType::Rgb16 => "RGB",
        ColorType::Rgba8 | ColorType::Rgba16 => "RGBA",
        ColorType::Bgr8 => "BGR",
        ColorType::Bgra8 => "BGRA",
        _ => "unknown",
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "PNG",
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Tiff => "TIFF",
        _ => "other",
    }
}

// ──────────────────────────────────────────────
// MockImageDecoder (testing)
// ──────────────────────────────────────────────

pub struct MockImageDecoder {
    meta: Option<ImageMeta>,
}

impl MockImageDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            meta: Some(ImageMeta {
                width,
                height,
                mode: "RGB".into(),
                format: "PNG".into(),
            }),
        }
    }

    pub fn failing() -> Self {
        Self { meta: None }
    }
}

impl ImageDecoder for MockImageDecoder {
    fn decode_image_meta(&self, _bytes: &[u8]) -> Result<ImageMeta, ExtractionError> {
        self.meta
            .clone()
            .ok_or_else(|| ExtractionError::ImageProcessing("mock decoder failure".into()))
    }
}
