//! Job queue contract: durable, at-least-once delivery of job descriptors.
//!
//! A received message stays invisible to other consumers until its
//! visibility timeout elapses or it is acknowledged. Messages that are never
//! acknowledged are redelivered, so every consumer must tolerate seeing the
//! same descriptor more than once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::job::{DescriptorError, JobDescriptor, MessageId};

/// Proof of one particular delivery of a message.
///
/// A new receipt is minted on every delivery; only the latest one can
/// acknowledge the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle {
    pub message_id: MessageId,
    pub token: String,
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.message_id, self.token)
    }
}

/// A message handed out by [`JobQueue::receive`].
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub receipt: ReceiptHandle,
    /// How many times this message has been delivered, including this one.
    pub receive_count: u32,
    /// Raw wire body.
    pub body: String,
}

impl ReceivedMessage {
    pub fn message_id(&self) -> &MessageId {
        &self.receipt.message_id
    }

    pub fn descriptor(&self) -> Result<JobDescriptor, DescriptorError> {
        JobDescriptor::from_wire(&self.body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("job queue backend is unavailable: {0}")]
    Unavailable(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("failed to serialize job: {0}")]
    Serialize(#[from] DescriptorError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("job queue backend is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AckError {
    /// The receipt expired or the message was redelivered or already
    /// deleted. Non-fatal: the message will be processed again.
    #[error("receipt {0} is stale")]
    StaleReceipt(ReceiptHandle),

    #[error("job queue backend is unavailable: {0}")]
    Unavailable(String),
}

/// Durable at-least-once job queue.
pub trait JobQueue: Send + Sync + 'static {
    /// Serialize and durably submit a descriptor.
    fn enqueue<'a>(&'a self, job: &'a JobDescriptor) -> BoxFuture<'a, Result<MessageId, EnqueueError>>;

    /// Claim up to `max_batch` visible messages for `visibility_timeout`.
    fn receive(
        &self,
        max_batch: usize,
        visibility_timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<ReceivedMessage>, ReceiveError>>;

    /// Permanently remove the message the receipt belongs to.
    fn acknowledge<'a>(&'a self, receipt: &'a ReceiptHandle) -> BoxFuture<'a, Result<(), AckError>>;
}
