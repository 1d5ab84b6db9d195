//! Core domain types for the document signing pipeline.
//!
//! This crate contains shared types and component contracts used across all
//! packages:
//! - `JobDescriptor` and its wire format
//! - `JobQueue`, `DistributedLock`, `BlobStore` and `Signer` seams
//! - `PipelineEvent` for telemetry
//! - `intake` for turning requests into queued jobs

use std::future::Future;
use std::pin::Pin;

mod blob;
mod events;
pub mod intake;
mod job;
mod lock;
mod queue;
mod signing;

pub use blob::{BlobError, BlobStore};
pub use events::{AbandonReason, PipelineEvent};
pub use intake::{IntakeError, SigningRequest};
pub use job::{
    ArtifactState, AuthSecret, DescriptorError, DocumentArtifact, DocumentLocation, JobDescriptor,
    JobState, KeySlot, MessageId, ResourceKey, SIGNED_SUFFIX,
};
pub use lock::{DistributedLock, LockError, LockToken};
pub use queue::{AckError, EnqueueError, JobQueue, ReceiptHandle, ReceiveError, ReceivedMessage};
pub use signing::{Signer, SigningError, SigningFailureKind};

/// Future type returned by the component traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
