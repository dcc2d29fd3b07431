//! Pipeline integration tests
//!
//! Exercise the full notification handling flow against in-memory object
//! store / image store / acknowledgment fakes: dedup under redelivery and
//! concurrency, promotion races, link bookkeeping, and the per-configuration
//! job state machine.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use image_service::db::ImageStore;
use image_service::error::{AppError, Result};
use image_service::models::{
    GeneratedImage, ImageStatus, JobStatus, ProcessJobConfiguration, ProcessingJob, UploadedImage,
    UserImage,
};
use image_service::services::pipeline::{
    AckHandle, Disposition, JobOutcome, JobScheduler, UploadEventHandler,
};
use image_service::storage::{
    canonical_object_path, content_md5, ObjectMeta, ObjectRef, ObjectStore,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const BUCKET: &str = "upload-bucket";

// ========================================
// In-memory object store
// ========================================

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    metadata: BTreeMap<String, String>,
    updated: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    fn object_key(object: &ObjectRef) -> String {
        format!("{}/{}", object.bucket, object.path)
    }

    fn put(
        &self,
        object: &ObjectRef,
        data: &[u8],
        content_type: &str,
        metadata: &[(&str, &str)],
    ) {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(
            Self::object_key(object),
            StoredObject {
                data: Bytes::copy_from_slice(data),
                content_type: content_type.to_string(),
                metadata: metadata
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                updated: Utc::now(),
            },
        );
    }

    fn contains(&self, object: &ObjectRef) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&Self::object_key(object))
    }

    fn count_with_prefix(&self, bucket: &str, prefix: &str) -> usize {
        let full_prefix = format!("{bucket}/{prefix}");
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&full_prefix))
            .count()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, object: &ObjectRef) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.get(&Self::object_key(object)).map(|stored| ObjectMeta {
            size: stored.data.len() as i64,
            content_type: Some(stored.content_type.clone()),
            md5_hash: Some(content_md5(&stored.data)),
            metadata: stored
                .metadata
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
            updated: Some(stored.updated),
        }))
    }

    async fn download(&self, object: &ObjectRef) -> Result<Bytes> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&Self::object_key(object))
            .map(|stored| stored.data.clone())
            .ok_or_else(|| AppError::Storage(format!("object {} not found", object.uri())))
    }

    async fn upload(
        &self,
        object: &ObjectRef,
        data: Bytes,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.insert(
            Self::object_key(object),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
                updated: Utc::now(),
            },
        );
        Ok(())
    }

    async fn copy(
        &self,
        source: &ObjectRef,
        dest: &ObjectRef,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let data = objects
            .get(&Self::object_key(source))
            .map(|stored| stored.data.clone())
            .ok_or_else(|| AppError::Storage(format!("object {} not found", source.uri())))?;
        objects.insert(
            Self::object_key(dest),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
                updated: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.remove(&Self::object_key(object));
        Ok(())
    }
}

// ========================================
// In-memory image store
// ========================================

#[derive(Default)]
struct StoreState {
    uploaded: Vec<UploadedImage>,
    user_images: Vec<UserImage>,
    configurations: Vec<ProcessJobConfiguration>,
    generated: Vec<GeneratedImage>,
    jobs: Vec<ProcessingJob>,
}

#[derive(Default)]
struct MemoryImageStore {
    state: Mutex<StoreState>,
}

impl MemoryImageStore {
    fn add_configuration(&self, configuration: ProcessJobConfiguration) {
        self.state.lock().unwrap().configurations.push(configuration);
    }

    fn add_user_image(&self, link: UserImage) {
        self.state.lock().unwrap().user_images.push(link);
    }

    fn add_generated(&self, generated: GeneratedImage) {
        self.state.lock().unwrap().generated.push(generated);
    }

    fn add_job(&self, job: ProcessingJob) {
        self.state.lock().unwrap().jobs.push(job);
    }

    fn uploaded(&self) -> Vec<UploadedImage> {
        self.state.lock().unwrap().uploaded.clone()
    }

    fn user_images(&self) -> Vec<UserImage> {
        self.state.lock().unwrap().user_images.clone()
    }

    fn generated(&self) -> Vec<GeneratedImage> {
        self.state.lock().unwrap().generated.clone()
    }

    fn jobs(&self) -> Vec<ProcessingJob> {
        self.state.lock().unwrap().jobs.clone()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn find_uploaded_image_by_hash(
        &self,
        file_hash: &str,
    ) -> Result<Option<UploadedImage>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .uploaded
            .iter()
            .find(|image| image.file_hash == file_hash)
            .cloned())
    }

    async fn insert_uploaded_image(&self, image: &UploadedImage) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state
            .uploaded
            .iter()
            .any(|existing| existing.file_hash == image.file_hash)
        {
            return Ok(false);
        }
        state.uploaded.push(image.clone());
        Ok(true)
    }

    async fn update_user_image_status(
        &self,
        user_image_id: Uuid,
        status: ImageStatus,
        uploaded_image_id: Option<Uuid>,
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut matched = 0;
        for link in state
            .user_images
            .iter_mut()
            .filter(|link| link.id == user_image_id)
        {
            link.status = status.as_str().to_string();
            if uploaded_image_id.is_some() {
                link.uploaded_image_id = uploaded_image_id;
            }
            link.updated_at = Some(Utc::now());
            matched += 1;
        }
        Ok(matched)
    }

    async fn insert_user_image(&self, link: &UserImage) -> Result<()> {
        self.state.lock().unwrap().user_images.push(link.clone());
        Ok(())
    }

    async fn is_user_image_expired(
        &self,
        user_image_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .user_images
            .iter()
            .find(|link| link.id == user_image_id)
            .and_then(|link| link.expired_at)
            .map(|expired_at| expired_at <= now)
            .unwrap_or(false))
    }

    async fn unprocessed_configurations(
        &self,
        uploaded_image_id: Uuid,
    ) -> Result<Vec<ProcessJobConfiguration>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .configurations
            .iter()
            .filter(|configuration| {
                !state.generated.iter().any(|generated| {
                    generated.configuration_id == configuration.id
                        && generated.uploaded_image_id == uploaded_image_id
                })
            })
            .cloned()
            .collect())
    }

    async fn latest_job_status(
        &self,
        configuration_id: Uuid,
        uploaded_image_id: Uuid,
    ) -> Result<Option<JobStatus>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .jobs
            .iter()
            .filter(|job| {
                job.configuration_id == configuration_id
                    && job.uploaded_image_id == uploaded_image_id
            })
            .max_by_key(|job| job.started_at)
            .map(|job| job.get_status()))
    }

    async fn remove_last_processing_job(
        &self,
        configuration_id: Uuid,
        uploaded_image_id: Uuid,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.retain(|job| {
            !(job.configuration_id == configuration_id
                && job.uploaded_image_id == uploaded_image_id)
        });
        Ok(())
    }

    async fn insert_processing_job(&self, job: &ProcessingJob) -> Result<()> {
        self.state.lock().unwrap().jobs.push(job.clone());
        Ok(())
    }

    async fn update_processing_job(
        &self,
        job_id: Uuid,
        remark: Option<&str>,
        status: JobStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for job in state.jobs.iter_mut().filter(|job| job.id == job_id) {
            job.status = status.as_str().to_string();
            job.remark = remark.map(str::to_string);
            job.ended_at = Some(ended_at);
        }
        Ok(())
    }

    async fn insert_generated_image(&self, image: &GeneratedImage) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.generated.iter().any(|existing| {
            existing.uploaded_image_id == image.uploaded_image_id
                && existing.configuration_id == image.configuration_id
        }) {
            return Ok(false);
        }
        state.generated.push(image.clone());
        Ok(true)
    }
}

// ========================================
// Recording ack handle
// ========================================

#[derive(Default)]
struct RecordingAck {
    settled: Mutex<Vec<Disposition>>,
}

impl RecordingAck {
    fn settlements(&self) -> Vec<Disposition> {
        self.settled.lock().unwrap().clone()
    }
}

#[async_trait]
impl AckHandle for RecordingAck {
    async fn acknowledge(&self) -> Result<()> {
        self.settled.lock().unwrap().push(Disposition::Acknowledge);
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        self.settled.lock().unwrap().push(Disposition::Reject);
        Ok(())
    }
}

// ========================================
// Helpers
// ========================================

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    use image::ImageOutputFormat;
    use std::io::Cursor;
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .expect("encode png");
    buf
}

fn notification(bucket: &str, object_path: &str) -> Vec<u8> {
    serde_json::json!({
        "protoPayload": {
            "methodName": "storage.objects.create",
            "resourceName": format!("projects/_/buckets/{bucket}/objects/{object_path}"),
        }
    })
    .to_string()
    .into_bytes()
}

fn seed_raw_upload(
    store: &MemoryObjectStore,
    user_id: Uuid,
    user_image_id: Uuid,
    data: &[u8],
) -> (ObjectRef, Vec<u8>) {
    let raw = ObjectRef::new(BUCKET, format!("uploads/{user_id}/{user_image_id}"));
    store.put(
        &raw,
        data,
        "application/octet-stream",
        &[("fileName", "photo.png")],
    );
    let payload = notification(BUCKET, &raw.path);
    (raw, payload)
}

fn scale_configuration(scale: &str) -> ProcessJobConfiguration {
    ProcessJobConfiguration {
        id: Uuid::new_v4(),
        width: None,
        height: None,
        scale: Some(Decimal::from_str(scale).unwrap()),
        keep_ratio: false,
        quality: None,
        description: None,
        output_file_type: None,
        file_type: None,
    }
}

fn height_configuration(height: i32) -> ProcessJobConfiguration {
    ProcessJobConfiguration {
        id: Uuid::new_v4(),
        width: None,
        height: Some(height),
        scale: None,
        keep_ratio: true,
        quality: None,
        description: None,
        output_file_type: None,
        file_type: None,
    }
}

fn unsized_configuration() -> ProcessJobConfiguration {
    ProcessJobConfiguration {
        id: Uuid::new_v4(),
        width: None,
        height: None,
        scale: None,
        keep_ratio: true,
        quality: None,
        description: None,
        output_file_type: None,
        file_type: None,
    }
}

fn pipeline() -> (Arc<MemoryObjectStore>, Arc<MemoryImageStore>, UploadEventHandler) {
    let store = Arc::new(MemoryObjectStore::default());
    let db = Arc::new(MemoryImageStore::default());
    let handler = UploadEventHandler::new(store.clone(), db.clone());
    (store, db, handler)
}

// ========================================
// Tests
// ========================================

#[tokio::test]
async fn test_identical_content_creates_one_canonical_image() {
    let (store, db, handler) = pipeline();
    let data = png_bytes(40, 30);

    let (raw_a, payload_a) = seed_raw_upload(&store, Uuid::new_v4(), Uuid::new_v4(), &data);
    let (raw_b, payload_b) = seed_raw_upload(&store, Uuid::new_v4(), Uuid::new_v4(), &data);

    let ack = RecordingAck::default();
    assert_eq!(
        handler.process(&payload_a, &ack).await,
        Disposition::Acknowledge
    );
    assert_eq!(
        handler.process(&payload_b, &ack).await,
        Disposition::Acknowledge
    );

    let uploaded = db.uploaded();
    assert_eq!(uploaded.len(), 1, "one canonical row for identical content");
    let canonical = &uploaded[0];
    assert_eq!(canonical.get_status(), ImageStatus::Uploaded);
    assert_eq!(canonical.width, Some(40));
    assert_eq!(canonical.height, Some(30));

    // Both links resolve to the same canonical image
    let links = db.user_images();
    assert_eq!(links.len(), 2);
    for link in &links {
        assert_eq!(link.get_status(), ImageStatus::Uploaded);
        assert_eq!(link.uploaded_image_id, Some(canonical.id));
    }

    // Raw objects are never left behind after a terminal acknowledge
    assert!(!store.contains(&raw_a));
    assert!(!store.contains(&raw_b));
    assert!(store.contains(&ObjectRef::new(BUCKET, canonical_object_path(canonical.id))));
}

#[tokio::test]
async fn test_concurrent_promotions_converge() {
    let (store, db, handler) = pipeline();
    let data = png_bytes(64, 64);

    let (_, payload_a) = seed_raw_upload(&store, Uuid::new_v4(), Uuid::new_v4(), &data);
    let (_, payload_b) = seed_raw_upload(&store, Uuid::new_v4(), Uuid::new_v4(), &data);

    let ack_a = RecordingAck::default();
    let ack_b = RecordingAck::default();
    let (disposition_a, disposition_b) = tokio::join!(
        handler.process(&payload_a, &ack_a),
        handler.process(&payload_b, &ack_b),
    );

    // Neither promoter errors
    assert_eq!(disposition_a, Disposition::Acknowledge);
    assert_eq!(disposition_b, Disposition::Acknowledge);

    // One canonical row and one canonical object survive
    let uploaded = db.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(store.count_with_prefix(BUCKET, "uploaded/"), 1);
    assert_eq!(store.count_with_prefix(BUCKET, "uploads/"), 0);

    let canonical_id = uploaded[0].id;
    for link in db.user_images() {
        assert_eq!(link.uploaded_image_id, Some(canonical_id));
    }
}

#[tokio::test]
async fn test_scale_configuration_floors_dimensions() {
    let (store, db, handler) = pipeline();
    db.add_configuration(scale_configuration("0.33"));

    let (_, payload) = seed_raw_upload(
        &store,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &png_bytes(100, 50),
    );
    let ack = RecordingAck::default();
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);

    let generated = db.generated();
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0].width, 33);
    assert_eq!(generated[0].height, 16);

    let jobs = db.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].get_status(), JobStatus::Completed);
    assert!(jobs[0].ended_at.is_some());

    // The variant object is stored under the canonical image
    let canonical_id = db.uploaded()[0].id;
    assert!(store.contains(&ObjectRef::new(
        BUCKET,
        format!("thumbnails/{}/{}", canonical_id, generated[0].configuration_id),
    )));
}

#[tokio::test]
async fn test_height_only_configuration_truncates_after_half_even_rounding() {
    let (store, db, handler) = pipeline();
    db.add_configuration(height_configuration(150));

    // 150 / 100 = 1.5; 1.5 * 3 = 4.5 truncates to 4 (plain rounding of the
    // product would emit 5)
    let (_, payload) = seed_raw_upload(
        &store,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &png_bytes(3, 100),
    );
    let ack = RecordingAck::default();
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);

    let generated = db.generated();
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0].width, 4);
    assert_eq!(generated[0].height, 150);
}

#[tokio::test]
async fn test_unsized_configuration_fails_only_its_own_job() {
    let (store, db, handler) = pipeline();
    let broken = unsized_configuration();
    let working = scale_configuration("0.5");
    db.add_configuration(broken.clone());
    db.add_configuration(working.clone());

    let (_, payload) = seed_raw_upload(
        &store,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &png_bytes(80, 40),
    );
    let ack = RecordingAck::default();
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);

    let jobs = db.jobs();
    assert_eq!(jobs.len(), 2);
    let broken_job = jobs
        .iter()
        .find(|job| job.configuration_id == broken.id)
        .expect("job row for unsized configuration");
    assert_eq!(broken_job.get_status(), JobStatus::Failed);
    assert!(broken_job.remark.as_deref().unwrap_or("").contains("width / height"));

    let working_job = jobs
        .iter()
        .find(|job| job.configuration_id == working.id)
        .expect("job row for scale configuration");
    assert_eq!(working_job.get_status(), JobStatus::Completed);

    // Only the sibling produced a variant
    let generated = db.generated();
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0].configuration_id, working.id);
    assert_eq!((generated[0].width, generated[0].height), (40, 20));
}

#[tokio::test]
async fn test_missing_resource_name_is_acknowledged_without_writes() {
    let (store, db, handler) = pipeline();

    let ack = RecordingAck::default();
    let payload = br#"{"insertId": "abc", "severity": "INFO"}"#;
    assert_eq!(handler.process(payload, &ack).await, Disposition::Acknowledge);
    assert_eq!(ack.settlements(), vec![Disposition::Acknowledge]);

    assert!(db.uploaded().is_empty());
    assert!(db.user_images().is_empty());
    assert!(db.jobs().is_empty());
    assert_eq!(store.count_with_prefix(BUCKET, ""), 0);

    // Unparseable payloads are likewise permanent
    assert_eq!(
        handler.process(b"not json at all", &ack).await,
        Disposition::Acknowledge
    );
}

#[tokio::test]
async fn test_expired_link_drops_upload_without_scheduling() {
    let (store, db, handler) = pipeline();
    db.add_configuration(scale_configuration("0.5"));

    let user_id = Uuid::new_v4();
    let user_image_id = Uuid::new_v4();
    db.add_user_image(UserImage {
        id: user_image_id,
        user_id,
        uploaded_image_id: None,
        file_name: Some("photo.png".to_string()),
        status: ImageStatus::Pending.as_str().to_string(),
        created_at: Utc::now() - Duration::hours(2),
        updated_at: None,
        deleted_at: None,
        expired_at: Some(Utc::now() - Duration::hours(1)),
    });

    let (raw, payload) = seed_raw_upload(&store, user_id, user_image_id, &png_bytes(10, 10));
    let ack = RecordingAck::default();
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);

    let links = db.user_images();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].get_status(), ImageStatus::Expired);

    assert!(!store.contains(&raw), "expired raw upload is deleted");
    assert!(db.uploaded().is_empty(), "no promotion for expired links");
    assert!(db.jobs().is_empty(), "no job scheduling for expired links");
}

#[tokio::test]
async fn test_non_image_content_marks_link_and_hash_invalid() {
    let (store, db, handler) = pipeline();
    db.add_configuration(scale_configuration("0.5"));
    let data = b"PK\x03\x04 definitely a zip archive".to_vec();

    let (raw, payload) = seed_raw_upload(&store, Uuid::new_v4(), Uuid::new_v4(), &data);
    let user_image_id = Uuid::new_v4();
    let ack = RecordingAck::default();
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);

    assert!(!store.contains(&raw));
    let uploaded = db.uploaded();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].get_status(), ImageStatus::Invalid);
    assert_eq!(uploaded[0].file_hash, content_md5(&data));
    assert!(db.jobs().is_empty());

    // A second upload of the same bytes short-circuits at the dedup check
    let (raw_dup, payload_dup) = seed_raw_upload(&store, Uuid::new_v4(), user_image_id, &data);
    assert_eq!(
        handler.process(&payload_dup, &ack).await,
        Disposition::Acknowledge
    );
    assert!(!store.contains(&raw_dup));
    assert_eq!(db.uploaded().len(), 1, "invalid hash recorded only once");
}

#[tokio::test]
async fn test_redelivery_after_success_is_acknowledged() {
    let (store, db, handler) = pipeline();

    let (_, payload) = seed_raw_upload(
        &store,
        Uuid::new_v4(),
        Uuid::new_v4(),
        &png_bytes(20, 20),
    );
    let ack = RecordingAck::default();
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);
    // The broker may redeliver the already-handled notification; the raw
    // object is gone, which must not reject
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);

    assert_eq!(db.uploaded().len(), 1);
    assert_eq!(store.count_with_prefix(BUCKET, "uploaded/"), 1);
}

#[tokio::test]
async fn test_scheduler_runs_only_unprocessed_configurations() {
    let store = Arc::new(MemoryObjectStore::default());
    let db = Arc::new(MemoryImageStore::default());
    let scheduler = JobScheduler::new(store.clone(), db.clone());

    let uploaded_image_id = Uuid::new_v4();
    let canonical = ObjectRef::new(BUCKET, canonical_object_path(uploaded_image_id));
    store.put(&canonical, &png_bytes(60, 40), "image/png", &[]);

    let done = scale_configuration("0.5");
    let pending = scale_configuration("0.25");
    let in_flight = height_configuration(20);
    db.add_configuration(done.clone());
    db.add_configuration(pending.clone());
    db.add_configuration(in_flight.clone());

    // `done` already has a successful variant
    db.add_generated(GeneratedImage {
        id: Uuid::new_v4(),
        uploaded_image_id,
        configuration_id: done.id,
        width: 30,
        height: 20,
        file_size: 1,
        file_path: "gs://done".to_string(),
        file_type: Some("image/png".to_string()),
        file_hash: None,
        created_at: Utc::now(),
    });
    // `in_flight` has a RUNNING job from another instance
    db.add_job(ProcessingJob {
        id: Uuid::new_v4(),
        uploaded_image_id,
        configuration_id: in_flight.id,
        status: JobStatus::Running.as_str().to_string(),
        started_at: Utc::now(),
        ended_at: None,
        remark: None,
    });

    let outcomes = scheduler.run(BUCKET, uploaded_image_id).await.unwrap();

    // The satisfied configuration is not even attempted
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|(configuration_id, _)| *configuration_id != done.id));
    assert!(outcomes.contains(&(pending.id, JobOutcome::Completed)));
    assert!(outcomes.contains(&(in_flight.id, JobOutcome::Skipped)));

    let generated = db.generated();
    assert_eq!(generated.len(), 2);
    let new_variant = generated
        .iter()
        .find(|generated| generated.configuration_id == pending.id)
        .expect("variant for pending configuration");
    assert_eq!((new_variant.width, new_variant.height), (15, 10));
}

#[tokio::test]
async fn test_failed_configuration_is_retried_on_redelivery() {
    let (store, db, handler) = pipeline();
    let broken = unsized_configuration();
    db.add_configuration(broken.clone());

    let user_id = Uuid::new_v4();
    let user_image_id = Uuid::new_v4();
    let data = png_bytes(30, 30);
    let (_, payload) = seed_raw_upload(&store, user_id, user_image_id, &data);
    let ack = RecordingAck::default();
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);
    assert_eq!(db.jobs().len(), 1);
    let first_job_id = db.jobs()[0].id;
    assert_eq!(db.jobs()[0].get_status(), JobStatus::Failed);

    // Redelivery supersedes the FAILED row with a fresh attempt
    let (_, payload) = seed_raw_upload(&store, user_id, user_image_id, &data);
    assert_eq!(handler.process(&payload, &ack).await, Disposition::Acknowledge);
    let jobs = db.jobs();
    assert_eq!(jobs.len(), 1, "prior terminal job row is superseded");
    assert_ne!(jobs[0].id, first_job_id);
    assert_eq!(jobs[0].get_status(), JobStatus::Failed);
}
