//! Object storage access
//!
//! The pipeline talks to blob storage through the narrow [`ObjectStore`]
//! trait so it can run against an in-memory fake in tests. The production
//! implementation is [`GcsObjectStore`], a signed-URL REST client.

pub mod gcs;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use gcs::GcsObjectStore;

// Object metadata keys written on stored objects
pub const WIDTH_METADATA: &str = "width";
pub const HEIGHT_METADATA: &str = "height";
pub const EXTENSION_METADATA: &str = "ext";
pub const MIMETYPE_METADATA: &str = "mimeType";
pub const FILE_NAME_METADATA: &str = "fileName";
pub const FILE_ID_METADATA: &str = "fileId";
pub const ORIGINAL_FILE_ID_METADATA: &str = "originalId";
pub const CONFIGURATION_ID_METADATA: &str = "configurationId";

/// Base64-encoded MD5 of object content, the hash convention the store
/// itself reports in object metadata
pub fn content_md5(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
}

/// Storage path of a canonical, content-addressed image object
pub fn canonical_object_path(uploaded_image_id: Uuid) -> String {
    format!("uploaded/{uploaded_image_id}")
}

/// Storage path of a derived variant object
pub fn variant_object_path(uploaded_image_id: Uuid, configuration_id: Uuid) -> String {
    format!("thumbnails/{uploaded_image_id}/{configuration_id}")
}

/// A bucket-qualified object reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub path: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// `gs://bucket/path` form, stored as the file path on database rows
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.path)
    }
}

/// Metadata of a stored object as reported by the store
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
    pub size: i64,
    pub content_type: Option<String>,
    /// Base64-encoded MD5 of the object content
    pub md5_hash: Option<String>,
    /// User metadata; keys are lowercased (HTTP header transport)
    pub metadata: BTreeMap<String, String>,
    pub updated: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Case-insensitive user metadata lookup
    pub fn user_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(&key.to_lowercase()).map(String::as_str)
    }
}

/// Blob storage operations the pipeline depends on
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch object metadata; `None` when the object does not exist
    async fn head(&self, object: &ObjectRef) -> Result<Option<ObjectMeta>>;

    /// Download the full object content
    async fn download(&self, object: &ObjectRef) -> Result<Bytes>;

    /// Create an object with content type and user metadata
    async fn upload(
        &self,
        object: &ObjectRef,
        data: Bytes,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Server-side copy, replacing content type and user metadata on the
    /// destination
    async fn copy(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Delete an object; deleting a missing object is not an error
    async fn delete(&self, object: &ObjectRef) -> Result<()>;
}
