//! Variant generation
//!
//! Resolves target dimensions from a configuration, resamples the decoded
//! source and re-encodes it. Pure with respect to storage: the caller
//! uploads and records the result.
//!
//! Dimension resolution follows the reference arithmetic exactly: the
//! aspect ratio is computed as a decimal rounded to 12 fractional digits
//! with banker's rounding, multiplied by the source dimension, then
//! truncated to an integer. Scale factors floor each dimension.

use super::classifier::DecodedImage;
use crate::models::ProcessJobConfiguration;
use bytes::Bytes;
use image::imageops::FilterType;
use image::ImageOutputFormat;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::io::Cursor;
use thiserror::Error;
use uuid::Uuid;

const RATIO_SCALE: u32 = 12;
const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Failures local to one configuration; they fail that job only
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("cannot determine width / height for configuration {0}")]
    UnresolvableSize(Uuid),
    #[error("resolved dimensions {width}x{height} are empty for configuration {id}")]
    EmptySize { id: Uuid, width: u32, height: u32 },
    #[error("unsupported output format {0}")]
    UnsupportedFormat(String),
    #[error("arithmetic overflow resolving target dimensions")]
    Arithmetic,
    #[error("encode failed: {0}")]
    Encode(String),
}

/// An encoded variant ready for upload
#[derive(Debug, Clone)]
pub struct GeneratedVariant {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub ext: String,
}

/// Resolve target dimensions for a configuration, in strict priority order
pub fn resolve_dimensions(
    configuration: &ProcessJobConfiguration,
    source_width: u32,
    source_height: u32,
) -> Result<(u32, u32), GenerateError> {
    let (new_width, new_height) = match (configuration.width, configuration.height) {
        (None, Some(h)) if configuration.keep_ratio => {
            let h = u32::try_from(h).map_err(|_| GenerateError::Arithmetic)?;
            let ratio = Decimal::from(h)
                .checked_div(Decimal::from(source_height))
                .ok_or(GenerateError::Arithmetic)?
                .round_dp_with_strategy(RATIO_SCALE, RoundingStrategy::MidpointNearestEven);
            let w = (ratio * Decimal::from(source_width))
                .trunc()
                .to_u32()
                .ok_or(GenerateError::Arithmetic)?;
            (w, h)
        }
        (Some(w), None) if configuration.keep_ratio => {
            let w = u32::try_from(w).map_err(|_| GenerateError::Arithmetic)?;
            let ratio = Decimal::from(w)
                .checked_div(Decimal::from(source_width))
                .ok_or(GenerateError::Arithmetic)?
                .round_dp_with_strategy(RATIO_SCALE, RoundingStrategy::MidpointNearestEven);
            let h = (ratio * Decimal::from(source_height))
                .trunc()
                .to_u32()
                .ok_or(GenerateError::Arithmetic)?;
            (w, h)
        }
        (None, None) => match configuration.scale {
            Some(scale) => {
                let w = (Decimal::from(source_width) * scale)
                    .floor()
                    .to_u32()
                    .ok_or(GenerateError::Arithmetic)?;
                let h = (Decimal::from(source_height) * scale)
                    .floor()
                    .to_u32()
                    .ok_or(GenerateError::Arithmetic)?;
                (w, h)
            }
            None => return Err(GenerateError::UnresolvableSize(configuration.id)),
        },
        _ => return Err(GenerateError::UnresolvableSize(configuration.id)),
    };

    if new_width == 0 || new_height == 0 {
        return Err(GenerateError::EmptySize {
            id: configuration.id,
            width: new_width,
            height: new_height,
        });
    }
    Ok((new_width, new_height))
}

/// Generate the variant for one configuration
pub fn generate(
    image: &DecodedImage,
    configuration: &ProcessJobConfiguration,
) -> Result<GeneratedVariant, GenerateError> {
    let (width, height) = resolve_dimensions(configuration, image.width, image.height)?;

    let resized = image.pixels.resize_exact(width, height, FilterType::Triangle);

    // Output format falls back to the source's when the configuration does
    // not override it
    let mime_type = configuration
        .file_type
        .clone()
        .unwrap_or_else(|| image.mime_type.clone());
    let ext = configuration
        .output_file_type
        .clone()
        .unwrap_or_else(|| image.ext.clone());
    let quality = configuration
        .quality
        .map(|q| q.clamp(0, 100) as u8)
        .unwrap_or(DEFAULT_JPEG_QUALITY);

    let format = output_format(&ext, quality)?;
    let mut buf = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| GenerateError::Encode(e.to_string()))?;

    Ok(GeneratedVariant {
        data: Bytes::from(buf),
        width,
        height,
        mime_type,
        ext,
    })
}

/// Generate on the blocking thread pool; resize and encode are CPU-bound
pub async fn generate_async(
    image: DecodedImage,
    configuration: ProcessJobConfiguration,
) -> Result<GeneratedVariant, GenerateError> {
    tokio::task::spawn_blocking(move || generate(&image, &configuration))
        .await
        .map_err(|e| GenerateError::Encode(format!("variant task panicked: {e}")))?
}

fn output_format(ext: &str, quality: u8) -> Result<ImageOutputFormat, GenerateError> {
    match ext.to_lowercase().as_str() {
        "png" => Ok(ImageOutputFormat::Png),
        "jpeg" | "jpg" => Ok(ImageOutputFormat::Jpeg(quality)),
        "gif" => Ok(ImageOutputFormat::Gif),
        "bmp" => Ok(ImageOutputFormat::Bmp),
        "ico" => Ok(ImageOutputFormat::Ico),
        "tiff" => Ok(ImageOutputFormat::Tiff),
        other => Err(GenerateError::UnsupportedFormat(other.to_string())),
    }
}
