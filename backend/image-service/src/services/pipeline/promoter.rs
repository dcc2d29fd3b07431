//! Blob promotion
//!
//! Moves a raw upload into its canonical, content-addressed location and,
//! for first-seen content, persists the canonical record from the promoted
//! object's authoritative metadata. Concurrent promoters contend on the
//! canonical object and on the record's content-hash uniqueness; whichever
//! copy/insert lands first wins and the loser adopts the winner's state.

use super::classifier::DecodedImage;
use crate::db::ImageStore;
use crate::error::{AppError, Result};
use crate::models::{ImageStatus, UploadedImage};
use crate::storage::{
    canonical_object_path, ObjectRef, ObjectStore, EXTENSION_METADATA, FILE_ID_METADATA,
    HEIGHT_METADATA, MIMETYPE_METADATA, WIDTH_METADATA,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Promotion outcome
#[derive(Debug, Clone)]
pub enum Promotion {
    /// This instance created the canonical record
    Promoted(UploadedImage),
    /// The canonical object/record already existed (or a concurrent
    /// promoter committed first); proceed with the authoritative id
    AlreadyPromoted { uploaded_image_id: Uuid },
}

impl Promotion {
    pub fn uploaded_image_id(&self) -> Uuid {
        match self {
            Promotion::Promoted(image) => image.id,
            Promotion::AlreadyPromoted { uploaded_image_id } => *uploaded_image_id,
        }
    }
}

/// Promotes raw uploads into canonical storage
pub struct BlobPromoter {
    store: Arc<dyn ObjectStore>,
    db: Arc<dyn ImageStore>,
}

impl BlobPromoter {
    pub fn new(store: Arc<dyn ObjectStore>, db: Arc<dyn ImageStore>) -> Self {
        Self { store, db }
    }

    /// Whether the canonical object for this id already exists
    pub async fn canonical_exists(&self, bucket: &str, uploaded_image_id: Uuid) -> Result<bool> {
        let canonical = ObjectRef::new(bucket, canonical_object_path(uploaded_image_id));
        Ok(self.store.head(&canonical).await?.is_some())
    }

    /// Drop a raw object whose content is already promoted
    pub async fn discard_raw(&self, raw: &ObjectRef) -> Result<()> {
        self.store.delete(raw).await
    }

    /// Copy the raw object to its canonical location, delete the raw object,
    /// and persist the canonical record when this content is first-seen.
    pub async fn promote(
        &self,
        raw: &ObjectRef,
        uploaded_image_id: Uuid,
        image: &DecodedImage,
        create_record: bool,
    ) -> Result<Promotion> {
        let canonical = ObjectRef::new(&raw.bucket, canonical_object_path(uploaded_image_id));

        let mut metadata = BTreeMap::new();
        metadata.insert(WIDTH_METADATA.to_string(), image.width.to_string());
        metadata.insert(HEIGHT_METADATA.to_string(), image.height.to_string());
        metadata.insert(EXTENSION_METADATA.to_string(), image.ext.clone());
        metadata.insert(MIMETYPE_METADATA.to_string(), image.mime_type.clone());
        metadata.insert(FILE_ID_METADATA.to_string(), uploaded_image_id.to_string());

        let copied = match self
            .store
            .copy(raw, &canonical, &image.mime_type, &metadata)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                // A concurrent instance already wrote the canonical object
                warn!(
                    raw = %raw.uri(),
                    canonical = %canonical.uri(),
                    error = %e,
                    "Canonical copy failed; content processed by another instance"
                );
                false
            }
        };

        // The raw object must not outlive a terminal acknowledge
        self.store.delete(raw).await?;

        if !create_record || !copied {
            return Ok(Promotion::AlreadyPromoted { uploaded_image_id });
        }

        // Re-read the promoted object; the copy is the source of truth for
        // size, hash and timestamps
        let meta = self.store.head(&canonical).await?.ok_or_else(|| {
            AppError::Storage(format!(
                "canonical object {} missing after copy",
                canonical.uri()
            ))
        })?;

        let created_at = meta.updated.unwrap_or_else(Utc::now);
        let record = UploadedImage {
            id: uploaded_image_id,
            width: Some(image.width as i32),
            height: Some(image.height as i32),
            file_size: meta.size,
            file_path: Some(canonical.uri()),
            file_type: meta.content_type.clone().or_else(|| Some(image.mime_type.clone())),
            file_hash: meta.md5_hash.clone().unwrap_or_else(|| image.file_hash.clone()),
            status: ImageStatus::Uploaded.as_str().to_string(),
            created_at,
            updated_at: meta.updated,
        };

        if self.db.insert_uploaded_image(&record).await? {
            info!(
                uploaded_image_id = %uploaded_image_id,
                canonical = %canonical.uri(),
                "Canonical image promoted"
            );
            return Ok(Promotion::Promoted(record));
        }

        // Another instance committed a record for the same content first;
        // read back the authoritative row and drop our duplicate object
        let winner = self
            .db
            .find_uploaded_image_by_hash(&record.file_hash)
            .await?
            .ok_or_else(|| {
                AppError::Database(format!(
                    "canonical record for hash {} vanished after conflict",
                    record.file_hash
                ))
            })?;

        if winner.id != uploaded_image_id {
            if let Err(e) = self.store.delete(&canonical).await {
                warn!(
                    canonical = %canonical.uri(),
                    error = %e,
                    "Failed to remove duplicate canonical object"
                );
            }
        }

        info!(
            uploaded_image_id = %winner.id,
            "Concurrent promotion detected; adopting existing canonical image"
        );
        Ok(Promotion::AlreadyPromoted {
            uploaded_image_id: winner.id,
        })
    }
}
