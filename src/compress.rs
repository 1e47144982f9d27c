//! Compressed photo variants.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

pub const DEFAULT_JPEG_QUALITY: u8 = 70;
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Turns a decoded image into a compressed blob. `None` means the variant
/// could not be produced and should be skipped.
pub trait Compressor: Send + Sync {
    fn compress(&self, image: &DynamicImage) -> Option<Vec<u8>>;
}

/// Decode downloaded bytes into an image, sniffing the format.
pub fn decode(data: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory(data) {
        Ok(img) => Some(img),
        Err(e) => {
            tracing::debug!(error = %e, bytes = data.len(), "Failed to decode image");
            None
        }
    }
}

/// Downscales to fit a bounding square and re-encodes as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct JpegCompressor {
    quality: u8,
    max_dimension: u32,
}

impl Default for JpegCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION)
    }
}

impl JpegCompressor {
    /// `quality` is clamped to 1..=100, `max_dimension` to at least 1.
    pub fn new(quality: u8, max_dimension: u32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            max_dimension: max_dimension.max(1),
        }
    }
}

impl Compressor for JpegCompressor {
    fn compress(&self, image: &DynamicImage) -> Option<Vec<u8>> {
        let resized;
        let source = if image.width() > self.max_dimension || image.height() > self.max_dimension {
            resized = image.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3);
            &resized
        } else {
            image
        };

        // JPEG has no alpha channel
        let rgb = source.to_rgb8();
        let mut out = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        match rgb.write_with_encoder(encoder) {
            Ok(()) => Some(out.into_inner()),
            Err(e) => {
                tracing::warn!(error = %e, "JPEG encode failed");
                None
            }
        }
    }
}
