//! Content-hash deduplication
//!
//! Runs before download, classification and promotion so repeated uploads of
//! identical bytes short-circuit to the already-known canonical record.

use crate::db::ImageStore;
use crate::error::Result;
use crate::models::{ImageStatus, UploadedImage};

/// Outcome of a content-hash lookup
#[derive(Debug, Clone)]
pub enum ContentMatch {
    /// No canonical record exists for this content yet
    New,
    /// A valid canonical record exists
    KnownValid(UploadedImage),
    /// The content is already known to be invalid (not an image)
    KnownInvalid(UploadedImage),
}

/// Look up the canonical record for a content hash
pub async fn match_content(db: &dyn ImageStore, file_hash: &str) -> Result<ContentMatch> {
    match db.find_uploaded_image_by_hash(file_hash).await? {
        None => Ok(ContentMatch::New),
        Some(image) if image.get_status() == ImageStatus::Invalid => {
            Ok(ContentMatch::KnownInvalid(image))
        }
        Some(image) => Ok(ContentMatch::KnownValid(image)),
    }
}
