//! Per-configuration job scheduling
//!
//! For a canonical image, enumerates the configurations with no successful
//! variant yet and drives one job per configuration: RUNNING -> COMPLETED
//! or FAILED. One configuration's failure never aborts its siblings.
//!
//! The RUNNING/COMPLETED skip is a soft guard only: two instances can both
//! pass it before either inserts its RUNNING row. The guarded variant
//! insert keeps at most one persisted artifact per pair, which is the
//! invariant that matters.

use super::classifier::{self, Classified, DecodedImage};
use super::generator;
use crate::db::ImageStore;
use crate::error::{AppError, Result};
use crate::models::{GeneratedImage, JobStatus, ProcessJobConfiguration, ProcessingJob};
use crate::storage::{
    canonical_object_path, content_md5, variant_object_path, ObjectRef, ObjectStore,
    CONFIGURATION_ID_METADATA, EXTENSION_METADATA, HEIGHT_METADATA, MIMETYPE_METADATA,
    ORIGINAL_FILE_ID_METADATA, WIDTH_METADATA,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one configuration's job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Variant generated and recorded
    Completed,
    /// A job for this pair is already running or done
    Skipped,
    /// The attempt failed; the remark is persisted on the job row
    Failed(String),
}

/// Drives variant jobs for a canonical image
pub struct JobScheduler {
    store: Arc<dyn ObjectStore>,
    db: Arc<dyn ImageStore>,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn ObjectStore>, db: Arc<dyn ImageStore>) -> Self {
        Self { store, db }
    }

    /// Attempt every configuration lacking a successful variant for this
    /// canonical image. Returns one outcome per attempted configuration.
    pub async fn run(
        &self,
        bucket: &str,
        uploaded_image_id: Uuid,
    ) -> Result<Vec<(Uuid, JobOutcome)>> {
        let configurations = self.db.unprocessed_configurations(uploaded_image_id).await?;
        if configurations.is_empty() {
            return Ok(Vec::new());
        }

        // Jobs read from the canonical object, not the raw upload
        let canonical = ObjectRef::new(bucket, canonical_object_path(uploaded_image_id));
        let data = self.store.download(&canonical).await?;
        let image = match classifier::classify(&data) {
            Classified::Image(image) => image,
            Classified::NotAnImage(_) => {
                return Err(AppError::Image(format!(
                    "canonical object {} is not decodable",
                    canonical.uri()
                )))
            }
        };

        let mut outcomes = Vec::with_capacity(configurations.len());
        for configuration in configurations {
            let configuration_id = configuration.id;
            let outcome = self
                .run_job(bucket, uploaded_image_id, &image, configuration)
                .await?;
            outcomes.push((configuration_id, outcome));
        }
        Ok(outcomes)
    }

    async fn run_job(
        &self,
        bucket: &str,
        uploaded_image_id: Uuid,
        image: &DecodedImage,
        configuration: ProcessJobConfiguration,
    ) -> Result<JobOutcome> {
        let configuration_id = configuration.id;

        // Soft guard against duplicate in-flight work
        if let Some(status) = self
            .db
            .latest_job_status(configuration_id, uploaded_image_id)
            .await?
        {
            if status == JobStatus::Running || status == JobStatus::Completed {
                debug!(
                    configuration_id = %configuration_id,
                    uploaded_image_id = %uploaded_image_id,
                    status = status.as_str(),
                    "Skipping configuration; job already running or done"
                );
                return Ok(JobOutcome::Skipped);
            }
        }

        // Supersede the prior terminal attempt for this pair
        self.db
            .remove_last_processing_job(configuration_id, uploaded_image_id)
            .await?;

        let job = ProcessingJob {
            id: Uuid::new_v4(),
            uploaded_image_id,
            configuration_id,
            status: JobStatus::Running.as_str().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            remark: None,
        };
        self.db.insert_processing_job(&job).await?;

        info!(
            job_id = %job.id,
            configuration_id = %configuration_id,
            uploaded_image_id = %uploaded_image_id,
            "Started variant generation job"
        );

        match self
            .execute(bucket, uploaded_image_id, image, configuration)
            .await
        {
            Ok(()) => {
                self.db
                    .update_processing_job(job.id, None, JobStatus::Completed, Utc::now())
                    .await?;
                info!(
                    job_id = %job.id,
                    configuration_id = %configuration_id,
                    uploaded_image_id = %uploaded_image_id,
                    "Finished variant generation job"
                );
                Ok(JobOutcome::Completed)
            }
            Err(e) => {
                let remark = format!("Failed processing job[id = {}]. Reason: {e}", job.id);
                warn!(
                    job_id = %job.id,
                    configuration_id = %configuration_id,
                    uploaded_image_id = %uploaded_image_id,
                    error = %e,
                    "Failed variant generation job"
                );
                self.db
                    .update_processing_job(job.id, Some(&remark), JobStatus::Failed, Utc::now())
                    .await?;
                Ok(JobOutcome::Failed(remark))
            }
        }
    }

    /// One configuration attempt: generate, upload, record
    async fn execute(
        &self,
        bucket: &str,
        uploaded_image_id: Uuid,
        image: &DecodedImage,
        configuration: ProcessJobConfiguration,
    ) -> Result<()> {
        let configuration_id = configuration.id;
        let variant = generator::generate_async(image.clone(), configuration)
            .await
            .map_err(|e| AppError::Image(e.to_string()))?;

        let dest = ObjectRef::new(
            bucket,
            variant_object_path(uploaded_image_id, configuration_id),
        );

        let mut metadata = BTreeMap::new();
        metadata.insert(
            ORIGINAL_FILE_ID_METADATA.to_string(),
            uploaded_image_id.to_string(),
        );
        metadata.insert(
            CONFIGURATION_ID_METADATA.to_string(),
            configuration_id.to_string(),
        );
        metadata.insert(WIDTH_METADATA.to_string(), variant.width.to_string());
        metadata.insert(HEIGHT_METADATA.to_string(), variant.height.to_string());
        metadata.insert(EXTENSION_METADATA.to_string(), variant.ext.clone());
        metadata.insert(MIMETYPE_METADATA.to_string(), variant.mime_type.clone());

        self.store
            .upload(&dest, variant.data.clone(), &variant.mime_type, &metadata)
            .await?;

        let record = GeneratedImage {
            id: Uuid::new_v4(),
            uploaded_image_id,
            configuration_id,
            width: variant.width as i32,
            height: variant.height as i32,
            file_size: variant.data.len() as i64,
            file_path: dest.uri(),
            file_type: Some(variant.mime_type.clone()),
            file_hash: Some(content_md5(&variant.data)),
            created_at: Utc::now(),
        };

        // Guarded insert: at most one variant row per pair survives a
        // duplicate generation race
        if !self.db.insert_generated_image(&record).await? {
            debug!(
                configuration_id = %configuration_id,
                uploaded_image_id = %uploaded_image_id,
                "Variant already recorded for this pair"
            );
        }
        Ok(())
    }
}
