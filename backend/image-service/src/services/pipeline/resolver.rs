//! Notification payload resolution
//!
//! Audit notifications wrap the storage resource name in a nested JSON
//! envelope:
//!
//! ```json
//! {
//!   "protoPayload": {
//!     "methodName": "storage.objects.create",
//!     "resourceName": "projects/_/buckets/upload-bucket/objects/uploads/<userId>/<userImageId>"
//!   }
//! }
//! ```
//!
//! Parsing is pure; every failure is permanent (redelivery cannot fix a
//! malformed payload) and maps to an acknowledge-and-drop disposition.

use crate::storage::ObjectRef;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Permanent parse failures
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("payload cannot be parsed: {0}")]
    MalformedPayload(String),
    #[error("invalid resource name: {0}")]
    MalformedResource(String),
    #[error("invalid object path: {0}")]
    MalformedPath(String),
}

/// Owner and logical image extracted from a raw upload path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadKey {
    pub user_id: Uuid,
    pub user_image_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct AuditPayload {
    #[serde(rename = "protoPayload")]
    proto_payload: Option<ProtoPayload>,
}

#[derive(Debug, Deserialize)]
struct ProtoPayload {
    #[serde(rename = "resourceName")]
    resource_name: Option<serde_json::Value>,
}

/// Parse a notification payload down to the storage object it refers to
pub fn parse_notification(payload: &[u8]) -> Result<ObjectRef, ResolveError> {
    let payload: AuditPayload = serde_json::from_slice(payload)
        .map_err(|e| ResolveError::MalformedPayload(e.to_string()))?;

    let resource_name = payload
        .proto_payload
        .and_then(|p| p.resource_name)
        .ok_or_else(|| {
            ResolveError::MalformedResource("resource name must be present".to_string())
        })?;
    let resource_name = resource_name.as_str().ok_or_else(|| {
        ResolveError::MalformedResource("resource name must be a string".to_string())
    })?;

    parse_resource_name(resource_name)
}

/// Parse `projects/<project>/buckets/<bucket>/objects/<object>` into a
/// bucket-qualified object reference
pub fn parse_resource_name(resource_name: &str) -> Result<ObjectRef, ResolveError> {
    if resource_name.is_empty() {
        return Err(ResolveError::MalformedResource(
            "resource name cannot be empty".to_string(),
        ));
    }
    let parts: Vec<&str> = resource_name.splitn(6, '/').collect();
    if parts.len() != 6 || parts[2] != "buckets" {
        return Err(ResolveError::MalformedResource(format!(
            "invalid resource name {resource_name}"
        )));
    }
    Ok(ObjectRef::new(parts[3], parts[5]))
}

/// Parse `uploads/<userId>/<userImageId>` into the owning user and logical
/// image identifiers.
///
/// Objects outside the raw upload prefix (including the pipeline's own
/// canonical and variant writes, which also raise audit events) fail here
/// and get acknowledged instead of looping through redelivery.
pub fn parse_upload_key(object_path: &str) -> Result<UploadKey, ResolveError> {
    let parts: Vec<&str> = object_path.splitn(3, '/').collect();
    if parts.len() != 3 || parts[0] != "uploads" {
        return Err(ResolveError::MalformedPath(format!(
            "object {object_path} is not a raw upload"
        )));
    }
    let user_id = Uuid::parse_str(parts[1])
        .map_err(|e| ResolveError::MalformedPath(format!("invalid user id {}: {e}", parts[1])))?;
    let user_image_id = Uuid::parse_str(parts[2]).map_err(|e| {
        ResolveError::MalformedPath(format!("invalid user image id {}: {e}", parts[2]))
    })?;
    Ok(UploadKey {
        user_id,
        user_image_id,
    })
}
