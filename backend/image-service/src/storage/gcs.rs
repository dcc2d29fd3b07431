//! GCS client for pipeline storage operations
//!
//! Signed-URL REST client with service account authentication. The signer
//! covers GET/HEAD/PUT/DELETE plus the extension headers GCS requires for
//! server-side copies and `x-goog-meta-*` writes.

use super::{ObjectMeta, ObjectRef, ObjectStore};
use crate::config::GcsConfig;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

/// Characters that must be percent-encoded in the path component
const PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SIGNED_URL_TTL: Duration = Duration::from_secs(300);
const METADATA_HEADER_PREFIX: &str = "x-goog-meta-";

/// GCS object store backed by V4 signed URLs
pub struct GcsObjectStore {
    client_email: String,
    private_key: RsaPrivateKey,
    host: String,
    http_client: Client,
}

impl GcsObjectStore {
    /// Create a new store from raw service account JSON
    pub fn new(service_account_json: &str, host: &str) -> Result<Self> {
        #[derive(serde::Deserialize)]
        struct Sa {
            client_email: String,
            private_key: String,
        }
        let sa: Sa = serde_json::from_str(service_account_json)
            .map_err(|e| AppError::Config(format!("Invalid service account JSON: {e}")))?;

        let private_key = RsaPrivateKey::from_pkcs8_pem(&sa.private_key).map_err(|e| {
            AppError::Config(format!("Failed to parse service account private key: {e}"))
        })?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        info!(host = %host, "GCS client initialized");

        Ok(Self {
            client_email: sa.client_email,
            private_key,
            host: host.to_string(),
            http_client,
        })
    }

    /// Create a new store from configuration
    pub fn from_config(cfg: &GcsConfig) -> Result<Self> {
        let raw_json = if let Some(ref inline) = cfg.service_account_json {
            // Inline JSON may be base64 encoded
            if inline.trim().starts_with('{') {
                inline.clone()
            } else {
                use base64::Engine;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(inline.trim())
                    .map_err(|e| AppError::Config(format!("Failed to decode base64 SA JSON: {e}")))?;
                String::from_utf8(decoded)
                    .map_err(|e| AppError::Config(format!("Invalid UTF-8 in SA JSON: {e}")))?
            }
        } else if let Some(ref path) = cfg.service_account_json_path {
            fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("Failed to read GCS service account JSON at {path}: {e}"))
            })?
        } else {
            return Err(AppError::Config(
                "GCS client requested but no service account JSON provided".into(),
            ));
        };

        Self::new(&raw_json, &cfg.host)
    }

    /// Generate a V4 signed URL covering the host plus any extension headers
    /// the request will carry
    fn sign_url(
        &self,
        method: &str,
        object: &ObjectRef,
        expires_in: Duration,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<String> {
        let now = Utc::now();
        let datestamp = now.format("%Y%m%d").to_string();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();

        let credential_scope = format!("{datestamp}/auto/storage/goog4_request");
        let credential = format!("{}/{}", self.client_email, credential_scope);

        let encoded_object = utf8_percent_encode(&object.path, PATH_SET).to_string();
        let canonical_uri = format!(
            "/{}{}",
            object.bucket,
            if encoded_object.starts_with('/') {
                encoded_object
            } else {
                format!("/{}", encoded_object)
            }
        );

        // Canonical headers are lowercased and sorted; host is always signed
        let mut headers: BTreeMap<String, String> = extra_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
            .collect();
        headers.insert("host".to_string(), self.host.clone());

        let canonical_headers = headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect::<String>();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let expires = expires_in.as_secs();
        let mut query_items = vec![
            ("X-Goog-Algorithm", "GOOG4-RSA-SHA256".to_string()),
            (
                "X-Goog-Credential",
                urlencoding::encode(&credential).into_owned(),
            ),
            ("X-Goog-Date", timestamp.clone()),
            ("X-Goog-Expires", expires.to_string()),
            (
                "X-Goog-SignedHeaders",
                urlencoding::encode(&signed_headers).into_owned(),
            ),
        ];

        query_items.sort_by(|a, b| a.0.cmp(b.0));
        let canonical_query = query_items
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\nUNSIGNED-PAYLOAD"
        );
        let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign =
            format!("GOOG4-RSA-SHA256\n{timestamp}\n{credential_scope}\n{canonical_hash}");

        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key.sign(string_to_sign.as_bytes()).to_bytes();
        let signature_hex = hex::encode(signature);

        let query_with_sig = format!("{canonical_query}&X-Goog-Signature={signature_hex}");
        let url = format!(
            "https://{host}{canonical_uri}?{query_with_sig}",
            host = self.host
        );
        Ok(url)
    }

    fn metadata_headers(metadata: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        metadata
            .iter()
            .map(|(k, v)| (format!("{METADATA_HEADER_PREFIX}{}", k.to_lowercase()), v.clone()))
            .collect()
    }
}

fn parse_object_meta(headers: &reqwest::header::HeaderMap) -> ObjectMeta {
    let size = headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    let content_type = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // x-goog-hash arrives as `crc32c=...,md5=...`, possibly split across
    // multiple header values
    let md5_hash = headers
        .get_all("x-goog-hash")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|part| part.trim().strip_prefix("md5=").map(str::to_string));

    let mut metadata = BTreeMap::new();
    for (name, value) in headers.iter() {
        if let Some(key) = name.as_str().strip_prefix(METADATA_HEADER_PREFIX) {
            if let Ok(v) = value.to_str() {
                metadata.insert(key.to_lowercase(), v.to_string());
            }
        }
    }

    let updated = headers
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc));

    ObjectMeta {
        size,
        content_type,
        md5_hash,
        metadata,
        updated,
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn head(&self, object: &ObjectRef) -> Result<Option<ObjectMeta>> {
        let signed_url = self.sign_url("HEAD", object, SIGNED_URL_TTL, &BTreeMap::new())?;

        let response = self
            .http_client
            .head(&signed_url)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("GCS head failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "GCS head failed with status {}",
                response.status()
            )));
        }

        Ok(Some(parse_object_meta(response.headers())))
    }

    async fn download(&self, object: &ObjectRef) -> Result<Bytes> {
        let signed_url = self.sign_url("GET", object, SIGNED_URL_TTL, &BTreeMap::new())?;

        debug!(object = %object.uri(), "Downloading from GCS");

        let response = self
            .http_client
            .get(&signed_url)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("GCS download failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "GCS download failed with status {}: {}",
                status, body
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read GCS response: {e}")))?;

        debug!(object = %object.uri(), size = bytes.len(), "Downloaded from GCS");
        Ok(bytes)
    }

    async fn upload(
        &self,
        object: &ObjectRef,
        data: Bytes,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let extra = Self::metadata_headers(metadata);
        let signed_url = self.sign_url("PUT", object, SIGNED_URL_TTL, &extra)?;

        debug!(object = %object.uri(), size = data.len(), "Uploading to GCS");

        let mut request = self
            .http_client
            .put(&signed_url)
            .header("Content-Type", content_type)
            .body(data.clone());
        for (name, value) in &extra {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("GCS upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "GCS upload failed with status {}: {}",
                status, body
            )));
        }

        info!(object = %object.uri(), size = data.len(), "Uploaded to GCS");
        Ok(())
    }

    async fn copy(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut extra = Self::metadata_headers(metadata);
        extra.insert(
            "x-goog-copy-source".to_string(),
            format!(
                "/{}/{}",
                source.bucket,
                utf8_percent_encode(&source.path, PATH_SET)
            ),
        );
        extra.insert("x-goog-metadata-directive".to_string(), "REPLACE".to_string());

        let signed_url = self.sign_url("PUT", dest, SIGNED_URL_TTL, &extra)?;

        debug!(source = %source.uri(), dest = %dest.uri(), "Copying within GCS");

        let mut request = self
            .http_client
            .put(&signed_url)
            .header("Content-Type", content_type);
        for (name, value) in &extra {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("GCS copy failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "GCS copy failed with status {}: {}",
                status, body
            )));
        }

        info!(source = %source.uri(), dest = %dest.uri(), "Copied within GCS");
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        let signed_url = self.sign_url("DELETE", object, SIGNED_URL_TTL, &BTreeMap::new())?;

        let response = self
            .http_client
            .delete(&signed_url)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("GCS delete failed: {e}")))?;

        // Deleting an already-deleted object is fine; concurrent promoters
        // race on raw object cleanup
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "GCS delete failed with status {}",
                response.status()
            )));
        }

        debug!(object = %object.uri(), "Deleted from GCS");
        Ok(())
    }
}
