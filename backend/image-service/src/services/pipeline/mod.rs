//! Upload event pipeline
//!
//! One notification flows through: payload resolution -> content dedup ->
//! classification -> promotion into canonical storage -> per-configuration
//! variant jobs. Each stage reports a tagged outcome; the handler owns the
//! final acknowledge/reject decision.

pub mod classifier;
pub mod dedup;
pub mod generator;
pub mod handler;
pub mod promoter;
pub mod resolver;
pub mod scheduler;

use crate::error::Result;
use async_trait::async_trait;

pub use classifier::{Classified, ContentSummary, DecodedImage};
pub use dedup::ContentMatch;
pub use generator::{GenerateError, GeneratedVariant};
pub use handler::{DiscardReason, Disposition, Handled, UploadEventHandler};
pub use promoter::{BlobPromoter, Promotion};
pub use resolver::{ResolveError, UploadKey};
pub use scheduler::{JobOutcome, JobScheduler};

/// Per-notification acknowledgment handle.
///
/// Exactly one of `acknowledge`/`reject` is invoked per notification;
/// rejecting asks the broker to redeliver after its timeout.
#[async_trait]
pub trait AckHandle: Send + Sync {
    async fn acknowledge(&self) -> Result<()>;
    async fn reject(&self) -> Result<()>;
}
