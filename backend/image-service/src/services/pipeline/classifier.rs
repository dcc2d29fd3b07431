//! Content classification
//!
//! Sniffs raw object content by magic bytes, never by the declared content
//! type. Anything that is not a decodable image is reported as
//! [`Classified::NotAnImage`] with the sniffed mime type, size and content
//! hash so the caller can record the content as invalid; corrupt uploads
//! must not crash the pipeline.

use crate::storage::content_md5;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::sync::Arc;

const OCTET_STREAM: &str = "application/octet-stream";

/// Summary of a non-image object; the hash is always computable
#[derive(Debug, Clone)]
pub struct ContentSummary {
    pub mime_type: String,
    pub ext: String,
    pub file_size: i64,
    pub file_hash: String,
}

/// A decoded image ready for resizing
#[derive(Clone)]
pub struct DecodedImage {
    pub pixels: Arc<DynamicImage>,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub ext: String,
    pub file_size: i64,
    pub file_hash: String,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mime_type", &self.mime_type)
            .field("ext", &self.ext)
            .field("file_size", &self.file_size)
            .field("file_hash", &self.file_hash)
            .finish_non_exhaustive()
    }
}

/// Classification outcome
#[derive(Debug, Clone)]
pub enum Classified {
    Image(DecodedImage),
    NotAnImage(ContentSummary),
}

/// Classify raw object content
pub fn classify(data: &[u8]) -> Classified {
    let file_size = data.len() as i64;
    let file_hash = content_md5(data);

    let Some(mime_type) = sniff_mime(data) else {
        return Classified::NotAnImage(ContentSummary {
            mime_type: OCTET_STREAM.to_string(),
            ext: extension_of(OCTET_STREAM),
            file_size,
            file_hash,
        });
    };
    let ext = extension_of(mime_type);

    // A sniffed image type can still fail to decode (truncated or crafted
    // content); report it as not-an-image rather than erroring
    let pixels = match image::load_from_memory(data) {
        Ok(img) => img,
        Err(_) => {
            return Classified::NotAnImage(ContentSummary {
                mime_type: mime_type.to_string(),
                ext,
                file_size,
                file_hash,
            })
        }
    };

    let (width, height) = pixels.dimensions();
    Classified::Image(DecodedImage {
        pixels: Arc::new(pixels),
        width,
        height,
        mime_type: mime_type.to_string(),
        ext,
        file_size,
        file_hash,
    })
}

/// Magic-byte detection of supported image types
fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(data).ok()?;
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::Ico => Some("image/x-icon"),
        ImageFormat::Avif => Some("image/avif"),
        _ => None,
    }
}

/// Extension convention: the mime subtype
fn extension_of(mime_type: &str) -> String {
    mime_type.split('/').nth(1).unwrap_or("bin").to_string()
}
