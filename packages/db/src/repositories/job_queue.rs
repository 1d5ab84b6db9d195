//! SurrealDB-backed job queue with visibility timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use signer_core::{
    AckError, BoxFuture, EnqueueError, JobDescriptor, JobQueue, MessageId, ReceiptHandle,
    ReceiveError, ReceivedMessage,
};
use ulid::Ulid;

use crate::schema::QUEUE_TABLE;
use crate::{Database, is_write_conflict, now_ms};

/// Default enqueue payload limit, matching common hosted queues.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct QueueRecord {
    message_id: String,
    body: String,
    /// Message can be handed out once this deadline has passed.
    visible_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receipt: Option<String>,
    receive_count: u32,
    enqueued_at_ms: i64,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

const SELECT_VISIBLE: &str = r#"
SELECT * FROM signing_job
WHERE visible_at_ms <= $now
ORDER BY visible_at_ms ASC
LIMIT $limit
"#;

// Compare-and-set on the visibility deadline: only one consumer can move it.
const CLAIM: &str = r#"
UPDATE type::thing("signing_job", $id)
SET visible_at_ms = $until, receipt = $receipt, receive_count += 1
WHERE visible_at_ms <= $now
RETURN AFTER
"#;

const DELETE_WITH_RECEIPT: &str = r#"
DELETE type::thing("signing_job", $id)
WHERE receipt = $receipt AND visible_at_ms > $now
RETURN BEFORE
"#;

const COUNT: &str = "SELECT count() AS count FROM signing_job GROUP ALL";

/// Durable at-least-once queue stored in the `signing_job` table.
#[derive(Clone)]
pub struct SurrealJobQueue {
    db: Database,
    max_message_bytes: usize,
}

impl SurrealJobQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Set the enqueue payload limit.
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// Enqueue an already serialized body.
    pub async fn enqueue_body(&self, body: String) -> Result<MessageId, EnqueueError> {
        if body.len() > self.max_message_bytes {
            return Err(EnqueueError::PayloadTooLarge {
                size: body.len(),
                limit: self.max_message_bytes,
            });
        }

        let message_id = MessageId::new();
        let now = now_ms();
        let record = QueueRecord {
            message_id: message_id.to_string(),
            body,
            visible_at_ms: now,
            receipt: None,
            receive_count: 0,
            enqueued_at_ms: now,
        };

        let created: Option<QueueRecord> = self
            .db
            .create((QUEUE_TABLE, message_id.to_string()))
            .content(record)
            .await
            .map_err(|e| EnqueueError::Unavailable(e.to_string()))?;

        if created.is_none() {
            return Err(EnqueueError::Unavailable(format!(
                "message {} was not stored",
                message_id
            )));
        }

        tracing::debug!("Enqueued message {}", message_id);
        Ok(message_id)
    }

    /// Number of messages not yet acknowledged, visible or not.
    pub async fn len(&self) -> Result<u64, ReceiveError> {
        let mut response = self
            .db
            .query(COUNT)
            .await
            .map_err(|e| ReceiveError::Unavailable(e.to_string()))?;
        let rows: Vec<CountRow> = response
            .take(0)
            .map_err(|e| ReceiveError::Unavailable(e.to_string()))?;
        Ok(rows.first().map_or(0, |row| row.count))
    }

    pub async fn is_empty(&self) -> Result<bool, ReceiveError> {
        Ok(self.len().await? == 0)
    }

    async fn claim(
        &self,
        message_id: &str,
        receipt: &str,
        now: i64,
        until: i64,
    ) -> Result<Option<QueueRecord>, surrealdb::Error> {
        match self.try_claim(message_id, receipt, now, until).await {
            // A concurrent claim touched the record. Retrying either sees that
            // claim's deadline or, if it aborted too, claims the message.
            Err(e) if is_write_conflict(&e) => {
                match self.try_claim(message_id, receipt, now, until).await {
                    Err(e) if is_write_conflict(&e) => Ok(None),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn try_claim(
        &self,
        message_id: &str,
        receipt: &str,
        now: i64,
        until: i64,
    ) -> Result<Option<QueueRecord>, surrealdb::Error> {
        let mut response = self
            .db
            .query(CLAIM)
            .bind(("id", message_id.to_owned()))
            .bind(("receipt", receipt.to_owned()))
            .bind(("now", now))
            .bind(("until", until))
            .await?;
        let claimed: Vec<QueueRecord> = response.take(0)?;
        Ok(claimed.into_iter().next())
    }

    async fn receive_batch(
        &self,
        max_batch: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, ReceiveError> {
        if max_batch == 0 {
            return Ok(Vec::new());
        }

        let now = now_ms();
        let mut response = self
            .db
            .query(SELECT_VISIBLE)
            .bind(("now", now))
            .bind(("limit", max_batch as i64))
            .await
            .map_err(|e| ReceiveError::Unavailable(e.to_string()))?;
        let candidates: Vec<QueueRecord> = response
            .take(0)
            .map_err(|e| ReceiveError::Unavailable(e.to_string()))?;

        let until = now.saturating_add(i64::try_from(visibility_timeout.as_millis()).unwrap_or(i64::MAX));
        let mut delivered = Vec::with_capacity(candidates.len());
        let mut last_error = None;

        for candidate in candidates {
            let token = Ulid::new().to_string();
            match self.claim(&candidate.message_id, &token, now, until).await {
                Ok(Some(record)) => {
                    delivered.push(ReceivedMessage {
                        receipt: ReceiptHandle {
                            message_id: MessageId(record.message_id),
                            token,
                        },
                        receive_count: record.receive_count,
                        body: record.body,
                    });
                }
                Ok(None) => {
                    tracing::debug!(
                        "Message {} was claimed by another consumer",
                        candidate.message_id
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to claim message {}: {}", candidate.message_id, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered.is_empty() => Err(ReceiveError::Unavailable(e.to_string())),
            _ => Ok(delivered),
        }
    }

    async fn delete_with_receipt(&self, receipt: &ReceiptHandle) -> Result<(), AckError> {
        let mut response = self
            .db
            .query(DELETE_WITH_RECEIPT)
            .bind(("id", receipt.message_id.to_string()))
            .bind(("receipt", receipt.token.clone()))
            .bind(("now", now_ms()))
            .await
            .map_err(|e| AckError::Unavailable(e.to_string()))?;
        let deleted: Vec<QueueRecord> = response
            .take(0)
            .map_err(|e| AckError::Unavailable(e.to_string()))?;

        if deleted.is_empty() {
            return Err(AckError::StaleReceipt(receipt.clone()));
        }
        Ok(())
    }
}

impl JobQueue for SurrealJobQueue {
    fn enqueue<'a>(&'a self, job: &'a JobDescriptor) -> BoxFuture<'a, Result<MessageId, EnqueueError>> {
        Box::pin(async move {
            let body = job.to_wire()?;
            self.enqueue_body(body).await
        })
    }

    fn receive(
        &self,
        max_batch: usize,
        visibility_timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<ReceivedMessage>, ReceiveError>> {
        Box::pin(self.receive_batch(max_batch, visibility_timeout))
    }

    fn acknowledge<'a>(&'a self, receipt: &'a ReceiptHandle) -> BoxFuture<'a, Result<(), AckError>> {
        Box::pin(self.delete_with_receipt(receipt))
    }
}
