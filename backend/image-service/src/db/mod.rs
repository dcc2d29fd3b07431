/// Database access layer
///
/// The pipeline reads and writes through the [`ImageStore`] trait so tests
/// can substitute an in-memory implementation; [`PgImageStore`] is the
/// PostgreSQL gateway.
pub mod image_repo;

use crate::error::Result;
use crate::models::{
    GeneratedImage, ImageStatus, JobStatus, ProcessJobConfiguration, ProcessingJob, UploadedImage,
    UserImage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use image_repo::PgImageStore;

/// Durable store for canonical images, user links, variants and job rows
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Look up the canonical image for a content hash
    async fn find_uploaded_image_by_hash(&self, file_hash: &str)
        -> Result<Option<UploadedImage>>;

    /// Insert a canonical image row. Returns `false` when a row for the same
    /// content hash already exists (another writer committed first).
    async fn insert_uploaded_image(&self, image: &UploadedImage) -> Result<bool>;

    /// Update a link's status and, when given, its canonical reference.
    /// Returns the number of rows matched.
    async fn update_user_image_status(
        &self,
        user_image_id: Uuid,
        status: ImageStatus,
        uploaded_image_id: Option<Uuid>,
    ) -> Result<u64>;

    /// Create a link row
    async fn insert_user_image(&self, link: &UserImage) -> Result<()>;

    /// Whether the link's expiry time has passed at `now`
    async fn is_user_image_expired(
        &self,
        user_image_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Configurations with no successful variant for this canonical image
    async fn unprocessed_configurations(
        &self,
        uploaded_image_id: Uuid,
    ) -> Result<Vec<ProcessJobConfiguration>>;

    /// Status of the most recent job for a (configuration, image) pair
    async fn latest_job_status(
        &self,
        configuration_id: Uuid,
        uploaded_image_id: Uuid,
    ) -> Result<Option<JobStatus>>;

    /// Remove prior job rows for a (configuration, image) pair
    async fn remove_last_processing_job(
        &self,
        configuration_id: Uuid,
        uploaded_image_id: Uuid,
    ) -> Result<()>;

    /// Insert a job row
    async fn insert_processing_job(&self, job: &ProcessingJob) -> Result<()>;

    /// Move a job to a terminal status
    async fn update_processing_job(
        &self,
        job_id: Uuid,
        remark: Option<&str>,
        status: JobStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Insert a variant row unless one already exists for the pair.
    /// Returns `false` when the pair was already satisfied.
    async fn insert_generated_image(&self, image: &GeneratedImage) -> Result<bool>;
}
