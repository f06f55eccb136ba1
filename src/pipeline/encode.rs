//! PNG encoding tuned for rasterised pages.
//!
//! ## Why PNG?
//! Lossless compression preserves text crispness. JPEG artefacts on rendered
//! text confuse vision models and degrade extraction accuracy.
//!
//! ## Why fast compression?
//! Rendered pages are large (a 4x-scaled sheet is tens of megapixels) and the
//! bytes are consumed once, immediately, by the inference request. Spending
//! CPU on maximum deflate effort buys nothing, so we pick the encoder's fast
//! profile and skip per-scanline filtering.

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use tracing::debug;

/// Encode an RGB raster as PNG with the fast compression profile.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::NoFilter);
    encoder.write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgb8,
    )?;
    debug!(
        "encoded {}x{} raster → {} PNG bytes",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}
