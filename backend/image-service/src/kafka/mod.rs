//! Kafka consumer for upload notifications
//!
//! Binds the pipeline to the broker with manual offset management so the
//! pipeline's acknowledge/reject contract holds: acknowledging commits the
//! message offset, rejecting seeks the partition back to the message so it
//! is redelivered. Auto-commit would acknowledge behind the pipeline's
//! back.

use crate::config::KafkaConfig;
use crate::error::{AppError, Result};
use crate::services::pipeline::{AckHandle, UploadEventHandler};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Kafka consumer for upload notifications
pub struct UploadEventsConsumer {
    consumer: StreamConsumer,
    handler: Arc<UploadEventHandler>,
    shutdown_rx: watch::Receiver<bool>,
}

impl UploadEventsConsumer {
    /// Create a new consumer
    pub fn new(
        config: &KafkaConfig,
        handler: Arc<UploadEventHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .map_err(|e| AppError::Kafka(format!("Failed to create Kafka consumer: {e}")))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| AppError::Kafka(format!("Failed to subscribe to topic: {e}")))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Upload events consumer initialized"
        );

        Ok(Self {
            consumer,
            handler,
            shutdown_rx,
        })
    }

    /// Run the consumer loop
    pub async fn run(&mut self) -> Result<()> {
        use futures::StreamExt;

        info!("Starting upload events consumer loop");

        let mut message_stream = self.consumer.stream();

        loop {
            tokio::select! {
                // Check for shutdown signal
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping consumer");
                        break;
                    }
                }

                // Process messages
                message = message_stream.next() => {
                    match message {
                        Some(Ok(msg)) => self.process_message(&msg).await,
                        Some(Err(e)) => {
                            error!(error = %e, "Kafka consumer error");
                            // Continue consuming despite errors
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!("Upload events consumer stopped");
        Ok(())
    }

    /// Dispatch a single message into the pipeline. The handler settles the
    /// acknowledgment, so even unparseable payloads get committed.
    async fn process_message(&self, msg: &BorrowedMessage<'_>) {
        let payload = msg.payload().unwrap_or_default();
        let ack = KafkaAckHandle {
            consumer: &self.consumer,
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
        };
        self.handler.process(payload, &ack).await;
    }
}

/// Per-message acknowledgment bound to consumer offsets
struct KafkaAckHandle<'a> {
    consumer: &'a StreamConsumer,
    topic: String,
    partition: i32,
    offset: i64,
}

#[async_trait]
impl AckHandle for KafkaAckHandle<'_> {
    async fn acknowledge(&self) -> Result<()> {
        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| AppError::Kafka(format!("Failed to build offset list: {e}")))?;
        self.consumer
            .commit(&assignment, CommitMode::Async)
            .map_err(|e| AppError::Kafka(format!("Failed to commit offset: {e}")))
    }

    async fn reject(&self) -> Result<()> {
        // Rewinding to the rejected message makes the broker redeliver it
        // on the next poll
        self.consumer
            .seek(
                &self.topic,
                self.partition,
                Offset::Offset(self.offset),
                Duration::from_secs(5),
            )
            .map_err(|e| AppError::Kafka(format!("Failed to seek for redelivery: {e}")))
    }
}
