/// Data models for the image service
///
/// This module defines structures for:
/// - UploadedImage: canonical, content-addressed image records
/// - UserImage: a user's logical upload, linked to a canonical image
/// - ProcessJobConfiguration: named output configurations (reference data)
/// - GeneratedImage: derived variants produced per configuration
/// - ProcessingJob: transient per-configuration execution records
///
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ========================================
// Status Enums
// ========================================

/// Image status shared by canonical images and user image links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageStatus {
    Pending,
    Uploaded,
    Invalid,
    Expired,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Uploaded => "UPLOADED",
            Self::Invalid => "INVALID",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "UPLOADED" => Some(Self::Uploaded),
            "INVALID" => Some(Self::Invalid),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Processing job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

// ========================================
// Canonical Image
// ========================================

/// Canonical image entity; one row per distinct content hash
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UploadedImage {
    pub id: Uuid,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub file_size: i64,
    pub file_path: Option<String>,
    pub file_type: Option<String>,
    pub file_hash: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UploadedImage {
    pub fn get_status(&self) -> ImageStatus {
        ImageStatus::from_str(&self.status).unwrap_or(ImageStatus::Invalid)
    }
}

// ========================================
// User Image Link
// ========================================

/// A user's logical upload, resolved to a canonical image once processed
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserImage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub uploaded_image_id: Option<Uuid>,
    pub file_name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl UserImage {
    pub fn get_status(&self) -> ImageStatus {
        ImageStatus::from_str(&self.status).unwrap_or(ImageStatus::Pending)
    }
}

// ========================================
// Processing Configuration
// ========================================

/// Named output configuration; immutable reference data
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessJobConfiguration {
    pub id: Uuid,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub scale: Option<Decimal>,
    pub keep_ratio: bool,
    pub quality: Option<i32>,
    pub description: Option<String>,
    pub output_file_type: Option<String>,
    pub file_type: Option<String>,
}

// ========================================
// Generated Image
// ========================================

/// A derived variant; at most one successful row per
/// (uploaded_image, configuration) pair
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GeneratedImage {
    pub id: Uuid,
    pub uploaded_image_id: Uuid,
    pub configuration_id: Uuid,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub file_path: String,
    pub file_type: Option<String>,
    pub file_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ========================================
// Processing Job
// ========================================

/// Transient execution record for one (image, configuration) attempt
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub uploaded_image_id: Uuid,
    pub configuration_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub remark: Option<String>,
}

impl ProcessingJob {
    pub fn get_status(&self) -> JobStatus {
        JobStatus::from_str(&self.status).unwrap_or(JobStatus::Failed)
    }
}
