/// Configuration management for the image service
///
/// Loads configuration from environment variables with sensible defaults.
use crate::error::{AppError, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub gcs: GcsConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GcsConfig {
    pub host: String,
    pub service_account_json: Option<String>,
    pub service_account_json_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL not set".to_string()))?;

        let service_account_json = std::env::var("GCS_SERVICE_ACCOUNT_JSON").ok();
        let service_account_json_path = std::env::var("GCS_SERVICE_ACCOUNT_JSON_PATH").ok();
        if service_account_json.is_none() && service_account_json_path.is_none() {
            return Err(AppError::Config(
                "Either GCS_SERVICE_ACCOUNT_JSON or GCS_SERVICE_ACCOUNT_JSON_PATH must be set"
                    .to_string(),
            ));
        }

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic: std::env::var("KAFKA_TOPIC")
                    .unwrap_or_else(|_| "storage_audit_events".to_string()),
                group_id: std::env::var("KAFKA_GROUP_ID")
                    .unwrap_or_else(|_| "image-event-worker".to_string()),
            },
            gcs: GcsConfig {
                host: std::env::var("GCS_HOST")
                    .unwrap_or_else(|_| "storage.googleapis.com".to_string()),
                service_account_json,
                service_account_json_path,
            },
        })
    }
}
