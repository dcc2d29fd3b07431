//! Image event worker - consumes storage upload notifications and drives the
//! promotion and variant generation pipeline.
//!
//! Environment variables:
//! - DATABASE_URL: PostgreSQL URL (required)
//! - DATABASE_MAX_CONNECTIONS: pool size (default: 10)
//! - KAFKA_BROKERS: Kafka broker addresses (default: "localhost:9092")
//! - KAFKA_TOPIC: Topic to consume (default: "storage_audit_events")
//! - KAFKA_GROUP_ID: Consumer group ID (default: "image-event-worker")
//! - GCS_HOST: Storage host (default: "storage.googleapis.com")
//! - GCS_SERVICE_ACCOUNT_JSON: Service account JSON content (raw or base64)
//! - GCS_SERVICE_ACCOUNT_JSON_PATH: Alternative: path to service account JSON file

use image_service::db::PgImageStore;
use image_service::kafka::UploadEventsConsumer;
use image_service::services::pipeline::UploadEventHandler;
use image_service::storage::GcsObjectStore;
use image_service::Config;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("image_service=info".parse().expect("valid directive")),
        )
        .init();

    info!("Starting image event worker");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().map_err(|e| format!("{e}"))?;
    info!(
        kafka_brokers = %config.kafka.brokers,
        kafka_topic = %config.kafka.topic,
        "Configuration loaded"
    );

    // Create object store client
    let store = Arc::new(GcsObjectStore::from_config(&config.gcs).map_err(|e| format!("{e}"))?);

    // Connect to the database and apply migrations
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let db = Arc::new(PgImageStore::new(pool));
    info!("Database connection established");

    // Build the pipeline
    let handler = Arc::new(UploadEventHandler::new(store, db));

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle SIGTERM/SIGINT for graceful shutdown
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl+c");
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Run the Kafka consumer (blocks until shutdown)
    let mut consumer = UploadEventsConsumer::new(&config.kafka, handler, shutdown_rx)
        .map_err(|e| format!("{e}"))?;
    if let Err(e) = consumer.run().await {
        error!(error = %e, "Consumer error");
    }

    info!("Image event worker stopped");
    Ok(())
}
