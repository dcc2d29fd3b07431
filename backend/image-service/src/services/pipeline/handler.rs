//! Upload event handling
//!
//! One notification, one sequential pass: resolve the payload, dedup by
//! content hash, classify, promote, resolve the user's link, schedule
//! variant jobs. The handler owns the acknowledge/reject decision and
//! invokes exactly one of the two per notification.
//!
//! Permanent outcomes acknowledge — redelivery cannot fix a malformed
//! payload, a deleted source or a non-image upload, and a permanently
//! failing notification must not loop through the broker forever. Only
//! transient storage/database failures reject.

use super::classifier::{self, Classified};
use super::dedup::{self, ContentMatch};
use super::promoter::BlobPromoter;
use super::resolver::{self, ResolveError};
use super::scheduler::{JobOutcome, JobScheduler};
use super::AckHandle;
use crate::db::ImageStore;
use crate::error::Result;
use crate::models::{ImageStatus, UploadedImage, UserImage};
use crate::storage::{ObjectStore, FILE_NAME_METADATA};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Terminal decision for one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledge,
    Reject,
}

/// Why a notification was acknowledged without completing the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    MalformedPayload,
    MalformedResource,
    MalformedPath,
    SourceDeleted,
    MissingOwnerMetadata,
    LinkExpired,
    KnownInvalidContent,
    NotAnImage,
}

/// Acknowledged outcome of one notification
#[derive(Debug, Clone)]
pub enum Handled {
    /// Promotion done, link resolved, all eligible configurations attempted
    Completed {
        uploaded_image_id: Uuid,
        jobs: Vec<(Uuid, JobOutcome)>,
    },
    /// Permanent condition; prescribed side effects applied
    Discarded(DiscardReason),
}

/// Orchestrates the upload event pipeline
pub struct UploadEventHandler {
    store: Arc<dyn ObjectStore>,
    db: Arc<dyn ImageStore>,
    promoter: BlobPromoter,
    scheduler: JobScheduler,
}

impl UploadEventHandler {
    pub fn new(store: Arc<dyn ObjectStore>, db: Arc<dyn ImageStore>) -> Self {
        let promoter = BlobPromoter::new(store.clone(), db.clone());
        let scheduler = JobScheduler::new(store.clone(), db.clone());
        Self {
            store,
            db,
            promoter,
            scheduler,
        }
    }

    /// Handle one notification and settle its acknowledgment. Exactly one of
    /// acknowledge/reject is invoked.
    pub async fn process(&self, payload: &[u8], ack: &dyn AckHandle) -> Disposition {
        let processing_id = Uuid::new_v4();
        match self.handle(processing_id, payload).await {
            Ok(handled) => {
                match &handled {
                    Handled::Completed {
                        uploaded_image_id,
                        jobs,
                    } => info!(
                        processing_id = %processing_id,
                        uploaded_image_id = %uploaded_image_id,
                        jobs = jobs.len(),
                        "Finished processing upload notification"
                    ),
                    Handled::Discarded(reason) => info!(
                        processing_id = %processing_id,
                        reason = ?reason,
                        "Discarded upload notification"
                    ),
                }
                if let Err(e) = ack.acknowledge().await {
                    warn!(processing_id = %processing_id, error = %e, "Failed to acknowledge notification");
                }
                Disposition::Acknowledge
            }
            Err(e) => {
                error!(processing_id = %processing_id, error = %e, "Unexpected error; requesting redelivery");
                if let Err(e) = ack.reject().await {
                    warn!(processing_id = %processing_id, error = %e, "Failed to reject notification");
                }
                Disposition::Reject
            }
        }
    }

    /// The pipeline state machine, free of acknowledgment concerns. `Ok` is
    /// a permanent outcome (acknowledge); `Err` is transient (reject).
    pub async fn handle(&self, processing_id: Uuid, payload: &[u8]) -> Result<Handled> {
        // 1. Resolve payload -> raw object reference
        let raw = match resolver::parse_notification(payload) {
            Ok(raw) => raw,
            Err(e) => {
                error!(processing_id = %processing_id, error = %e, "Cannot resolve notification payload");
                return Ok(Handled::Discarded(match e {
                    ResolveError::MalformedPayload(_) => DiscardReason::MalformedPayload,
                    ResolveError::MalformedResource(_) => DiscardReason::MalformedResource,
                    ResolveError::MalformedPath(_) => DiscardReason::MalformedPath,
                }));
            }
        };
        info!(processing_id = %processing_id, object = %raw.uri(), "Start processing upload notification");

        // 2. Resolve object path -> owner and logical image
        let key = match resolver::parse_upload_key(&raw.path) {
            Ok(key) => key,
            Err(e) => {
                error!(processing_id = %processing_id, object = %raw.uri(), error = %e, "Cannot resolve upload path");
                return Ok(Handled::Discarded(DiscardReason::MalformedPath));
            }
        };

        // 3. The raw object may already be gone (redelivery after success,
        // or lifecycle cleanup)
        let Some(raw_meta) = self.store.head(&raw).await? else {
            info!(processing_id = %processing_id, object = %raw.uri(), "Raw object has been deleted");
            self.db
                .update_user_image_status(key.user_image_id, ImageStatus::Expired, None)
                .await?;
            return Ok(Handled::Discarded(DiscardReason::SourceDeleted));
        };

        // 4. Dedup by content hash before any download or classification
        let file_hash = raw_meta.md5_hash.clone().ok_or_else(|| {
            crate::error::AppError::Storage(format!(
                "object {} reports no content hash",
                raw.uri()
            ))
        })?;
        let content = dedup::match_content(self.db.as_ref(), &file_hash).await?;

        if let ContentMatch::KnownInvalid(_) = content {
            info!(processing_id = %processing_id, object = %raw.uri(), "Content hash is known invalid");
            self.store.delete(&raw).await?;
            self.db
                .update_user_image_status(key.user_image_id, ImageStatus::Invalid, None)
                .await?;
            return Ok(Handled::Discarded(DiscardReason::KnownInvalidContent));
        }

        // 5. The uploader records the display filename as object metadata;
        // without it the upload did not come through the front door
        let Some(file_name) = raw_meta.user_metadata(FILE_NAME_METADATA).map(str::to_string)
        else {
            warn!(processing_id = %processing_id, object = %raw.uri(), "Raw object carries no file name metadata");
            self.store.delete(&raw).await?;
            return Ok(Handled::Discarded(DiscardReason::MissingOwnerMetadata));
        };

        // 6. Expired logical images are dropped without promotion
        if self
            .db
            .is_user_image_expired(key.user_image_id, Utc::now())
            .await?
        {
            info!(processing_id = %processing_id, object = %raw.uri(), "Logical image expired; dropping upload");
            self.store.delete(&raw).await?;
            self.db
                .update_user_image_status(key.user_image_id, ImageStatus::Expired, None)
                .await?;
            return Ok(Handled::Discarded(DiscardReason::LinkExpired));
        }

        // 7. Promote (or adopt the existing canonical state)
        let known = match &content {
            ContentMatch::KnownValid(image) => Some(image.id),
            _ => None,
        };
        let mut already_promoted = None;
        if let Some(id) = known {
            if self.promoter.canonical_exists(&raw.bucket, id).await? {
                already_promoted = Some(id);
            }
        }

        let uploaded_image_id = if let Some(id) = already_promoted {
            // Identical content is already canonical; the duplicate raw
            // object is all that is left to clean up
            self.promoter.discard_raw(&raw).await?;
            id
        } else {
            let data = self.store.download(&raw).await?;
            match classifier::classify(&data) {
                Classified::NotAnImage(summary) => {
                    info!(
                        processing_id = %processing_id,
                        object = %raw.uri(),
                        mime_type = %summary.mime_type,
                        "Object is not an image"
                    );
                    self.store.delete(&raw).await?;
                    self.db
                        .update_user_image_status(key.user_image_id, ImageStatus::Invalid, None)
                        .await?;
                    if known.is_none() {
                        // Remember the hash so replays and duplicates stop
                        // at the dedup check
                        let record = UploadedImage {
                            id: Uuid::new_v4(),
                            width: None,
                            height: None,
                            file_size: summary.file_size,
                            file_path: None,
                            file_type: Some(summary.mime_type),
                            file_hash: summary.file_hash,
                            status: ImageStatus::Invalid.as_str().to_string(),
                            created_at: Utc::now(),
                            updated_at: None,
                        };
                        self.db.insert_uploaded_image(&record).await?;
                    }
                    return Ok(Handled::Discarded(DiscardReason::NotAnImage));
                }
                Classified::Image(image) => {
                    let target_id = known.unwrap_or_else(Uuid::new_v4);
                    let promotion = self
                        .promoter
                        .promote(&raw, target_id, &image, known.is_none())
                        .await?;
                    promotion.uploaded_image_id()
                }
            }
        };

        // 8. Resolve the user's link to the canonical image
        let matched = self
            .db
            .update_user_image_status(
                key.user_image_id,
                ImageStatus::Uploaded,
                Some(uploaded_image_id),
            )
            .await?;
        if matched == 0 {
            let link = UserImage {
                id: key.user_image_id,
                user_id: key.user_id,
                uploaded_image_id: Some(uploaded_image_id),
                file_name: Some(file_name),
                status: ImageStatus::Uploaded.as_str().to_string(),
                created_at: Utc::now(),
                updated_at: None,
                deleted_at: None,
                expired_at: None,
            };
            self.db.insert_user_image(&link).await?;
        }
        info!(
            processing_id = %processing_id,
            object = %raw.uri(),
            uploaded_image_id = %uploaded_image_id,
            "Resolved user image to canonical image"
        );

        // 9. Drive variant jobs
        let jobs = self.scheduler.run(&raw.bucket, uploaded_image_id).await?;

        Ok(Handled::Completed {
            uploaded_image_id,
            jobs,
        })
    }
}
