//! Image transform pipeline: decode, resize to the sticker bounding box,
//! then re-encode under the payload budget.

use crate::config;
use color_quant::NeuQuant;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageEncoder};
use std::io::Cursor;
use thiserror::Error;

/// NeuQuant sampling factor; 1 is exhaustive, 30 is fastest.
const QUANT_SAMPLE_FACTOR: i32 = 10;
/// Smallest palette the quality floor may request.
const MIN_PALETTE_COLORS: usize = 16;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome of the compression loop for one image.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    /// Quality the returned encoding was produced at.
    pub quality: u8,
    pub iterations: u32,
}

/// Decode a PNG/JPEG byte buffer.
pub fn load_image(data: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(data).map_err(PipelineError::Decode)
}

/// Scale so the longest edge equals `max_dimension`, preserving aspect
/// ratio. Smaller inputs are scaled up, matching the original raster
/// redraw behavior.
pub fn resize_to_limit(img: &DynamicImage, max_dimension: u32) -> DynamicImage {
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

/// Re-encode with a decreasing quality parameter until the payload fits the
/// budget or the quality floor is reached. The floor result is returned
/// as-is even when it still exceeds the budget.
pub fn compress_under_budget(
    img: &DynamicImage,
    opts: &config::Pipeline,
) -> Result<CompressedImage> {
    let budget = opts.size_budget_kb as usize * 1024;
    let mut quality = opts.quality_start;
    let mut iterations = 0u32;
    loop {
        iterations += 1;
        let bytes = encode_png(img, quality)?;
        if bytes.len() <= budget || quality <= opts.quality_floor {
            return Ok(CompressedImage {
                bytes,
                quality,
                iterations,
            });
        }
        quality = quality
            .saturating_sub(opts.quality_step)
            .max(opts.quality_floor);
    }
}

/// Encode as PNG. Quality 100 is lossless; anything below quantises the
/// palette first, with the palette size scaled by quality.
pub fn encode_png(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let raw = if quality >= 100 {
        rgba.into_raw()
    } else {
        quantize(rgba.into_raw(), quality)
    };

    let mut buf = Cursor::new(Vec::new());
    let encoder = PngEncoder::new_with_quality(
        &mut buf,
        CompressionType::Best,
        PngFilterType::Adaptive,
    );
    encoder
        .write_image(&raw, width, height, ColorType::Rgba8)
        .map_err(PipelineError::Encode)?;
    Ok(buf.into_inner())
}

/// Map every pixel onto a NeuQuant palette sized by quality.
fn quantize(mut raw: Vec<u8>, quality: u8) -> Vec<u8> {
    let colors = (256 * quality as usize / 100).clamp(MIN_PALETTE_COLORS, 256);
    let quant = NeuQuant::new(QUANT_SAMPLE_FACTOR, colors, &raw);
    let palette = quant.color_map_rgba();
    for px in raw.chunks_exact_mut(4) {
        let idx = quant.index_of(px) * 4;
        px.copy_from_slice(&palette[idx..idx + 4]);
    }
    raw
}
