//! PostgreSQL implementation of the image store

use super::ImageStore;
use crate::error::Result;
use crate::models::{
    GeneratedImage, ImageStatus, JobStatus, ProcessJobConfiguration, ProcessingJob, UploadedImage,
    UserImage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// sqlx-backed image store
#[derive(Clone)]
pub struct PgImageStore {
    pool: PgPool,
}

impl PgImageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageStore for PgImageStore {
    async fn find_uploaded_image_by_hash(
        &self,
        file_hash: &str,
    ) -> Result<Option<UploadedImage>> {
        let image = sqlx::query_as::<_, UploadedImage>(
            r#"
            SELECT id, width, height, file_size, file_path, file_type, file_hash,
                   status, created_at, updated_at
            FROM uploaded_images
            WHERE file_hash = $1
            "#,
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(image)
    }

    async fn insert_uploaded_image(&self, image: &UploadedImage) -> Result<bool> {
        // First committer wins; a conflicting hash means another instance
        // already promoted identical content
        let result = sqlx::query(
            r#"
            INSERT INTO uploaded_images
                (id, width, height, file_size, file_path, file_type, file_hash,
                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (file_hash) DO NOTHING
            "#,
        )
        .bind(image.id)
        .bind(image.width)
        .bind(image.height)
        .bind(image.file_size)
        .bind(&image.file_path)
        .bind(&image.file_type)
        .bind(&image.file_hash)
        .bind(&image.status)
        .bind(image.created_at)
        .bind(image.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_user_image_status(
        &self,
        user_image_id: Uuid,
        status: ImageStatus,
        uploaded_image_id: Option<Uuid>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE user_images
            SET status = $2,
                uploaded_image_id = COALESCE($3, uploaded_image_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_image_id)
        .bind(status.as_str())
        .bind(uploaded_image_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_user_image(&self, link: &UserImage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_images
                (id, user_id, uploaded_image_id, file_name, status,
                 created_at, updated_at, deleted_at, expired_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(link.id)
        .bind(link.user_id)
        .bind(link.uploaded_image_id)
        .bind(&link.file_name)
        .bind(&link.status)
        .bind(link.created_at)
        .bind(link.updated_at)
        .bind(link.deleted_at)
        .bind(link.expired_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_user_image_expired(
        &self,
        user_image_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expired: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT expired_at IS NOT NULL AND expired_at <= $2
            FROM user_images
            WHERE id = $1
            "#,
        )
        .bind(user_image_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(expired.unwrap_or(false))
    }

    async fn unprocessed_configurations(
        &self,
        uploaded_image_id: Uuid,
    ) -> Result<Vec<ProcessJobConfiguration>> {
        let configurations = sqlx::query_as::<_, ProcessJobConfiguration>(
            r#"
            SELECT c.id, c.width, c.height, c.scale, c.keep_ratio, c.quality,
                   c.description, c.output_file_type, c.file_type
            FROM process_job_configurations c
            WHERE NOT EXISTS (
                SELECT 1 FROM generated_images g
                WHERE g.configuration_id = c.id
                  AND g.uploaded_image_id = $1
            )
            "#,
        )
        .bind(uploaded_image_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(configurations)
    }

    async fn latest_job_status(
        &self,
        configuration_id: Uuid,
        uploaded_image_id: Uuid,
    ) -> Result<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status
            FROM processing_jobs
            WHERE configuration_id = $1 AND uploaded_image_id = $2
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(configuration_id)
        .bind(uploaded_image_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.as_deref().and_then(JobStatus::from_str))
    }

    async fn remove_last_processing_job(
        &self,
        configuration_id: Uuid,
        uploaded_image_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM processing_jobs
            WHERE configuration_id = $1 AND uploaded_image_id = $2
            "#,
        )
        .bind(configuration_id)
        .bind(uploaded_image_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_processing_job(&self, job: &ProcessingJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processing_jobs
                (id, uploaded_image_id, configuration_id, status,
                 started_at, ended_at, remark)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.uploaded_image_id)
        .bind(job.configuration_id)
        .bind(&job.status)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(&job.remark)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_processing_job(
        &self,
        job_id: Uuid,
        remark: Option<&str>,
        status: JobStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = $2, remark = $3, ended_at = $4
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(remark)
        .bind(ended_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_generated_image(&self, image: &GeneratedImage) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO generated_images
                (id, uploaded_image_id, configuration_id, width, height,
                 file_size, file_path, file_type, file_hash, created_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            WHERE NOT EXISTS (
                SELECT 1 FROM generated_images
                WHERE uploaded_image_id = $2 AND configuration_id = $3
            )
            "#,
        )
        .bind(image.id)
        .bind(image.uploaded_image_id)
        .bind(image.configuration_id)
        .bind(image.width)
        .bind(image.height)
        .bind(image.file_size)
        .bind(&image.file_path)
        .bind(&image.file_type)
        .bind(&image.file_hash)
        .bind(image.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
