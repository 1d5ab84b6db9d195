//! Intake boundary: turn a signing request into a queued job.

use serde::{Deserialize, Serialize};

use crate::job::{AuthSecret, DescriptorError, DocumentLocation, JobDescriptor, KeySlot, MessageId};
use crate::queue::{EnqueueError, JobQueue};

/// What a caller submits to have a document signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRequest {
    pub document: DocumentLocation,
    pub key_slot: KeySlot,
    pub auth_secret: AuthSecret,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("invalid signing request: {0}")]
    Invalid(#[from] DescriptorError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

impl SigningRequest {
    /// Build the descriptor from exactly the request fields plus the target
    /// bucket.
    pub fn into_descriptor(self, output_bucket: &str) -> Result<JobDescriptor, DescriptorError> {
        let descriptor =
            JobDescriptor::new(self.document, self.key_slot, self.auth_secret, output_bucket);
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Validate a request and enqueue it.
///
/// Only enqueue success or failure is reported; the signing outcome is
/// observable through the stored artifact and telemetry.
pub async fn submit(
    queue: &dyn JobQueue,
    request: SigningRequest,
    output_bucket: &str,
) -> Result<MessageId, IntakeError> {
    let descriptor = request.into_descriptor(output_bucket)?;
    Ok(queue.enqueue(&descriptor).await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::BoxFuture;
    use crate::queue::{AckError, ReceiptHandle, ReceiveError, ReceivedMessage};

    #[derive(Default)]
    struct RecordingQueue {
        bodies: Mutex<Vec<String>>,
    }

    impl JobQueue for RecordingQueue {
        fn enqueue<'a>(
            &'a self,
            job: &'a JobDescriptor,
        ) -> BoxFuture<'a, Result<MessageId, EnqueueError>> {
            Box::pin(async move {
                let body = job.to_wire()?;
                self.bodies.lock().expect("poisoned").push(body);
                Ok(MessageId::new())
            })
        }

        fn receive(
            &self,
            _max_batch: usize,
            _visibility_timeout: Duration,
        ) -> BoxFuture<'_, Result<Vec<ReceivedMessage>, ReceiveError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn acknowledge<'a>(
            &'a self,
            _receipt: &'a ReceiptHandle,
        ) -> BoxFuture<'a, Result<(), AckError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn request(key: &str) -> SigningRequest {
        SigningRequest {
            document: DocumentLocation::new("docs", key),
            key_slot: KeySlot(5),
            auth_secret: AuthSecret::new("1234"),
        }
    }

    #[tokio::test]
    async fn submit_enqueues_request_fields_plus_output_bucket() {
        let queue = RecordingQueue::default();
        submit(&queue, request("a.pdf"), "signed").await.expect("submit");

        let bodies = queue.bodies.lock().expect("poisoned");
        assert_eq!(bodies.len(), 1);
        let descriptor = JobDescriptor::from_wire(&bodies[0]).expect("decode");
        assert_eq!(descriptor.document_key, "a.pdf");
        assert_eq!(descriptor.key_slot, KeySlot(5));
        assert_eq!(descriptor.auth_secret.expose(), "1234");
        assert_eq!(descriptor.output_bucket, "signed");
    }

    #[tokio::test]
    async fn submit_rejects_incomplete_requests_without_enqueueing() {
        let queue = RecordingQueue::default();
        let result = submit(&queue, request(""), "signed").await;

        assert!(matches!(result, Err(IntakeError::Invalid(_))));
        assert!(queue.bodies.lock().expect("poisoned").is_empty());
    }
}
