//! Telemetry events emitted by the signing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{DocumentLocation, JobState, MessageId, ResourceKey};
use crate::signing::SigningFailureKind;

/// Why a job was given up for this delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbandonReason {
    /// The queued body could not be decoded into a descriptor.
    MalformedDescriptor { error: String },
    /// A failure that retrying cannot fix.
    NonRetryable { error: String },
    /// Every attempt failed with a retryable error.
    RetriesExhausted { last_error: String },
    /// The pipeline panicked.
    Internal { error: String },
}

impl AbandonReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbandonReason::MalformedDescriptor { .. } => "malformed_descriptor",
            AbandonReason::NonRetryable { .. } => "non_retryable",
            AbandonReason::RetriesExhausted { .. } => "retries_exhausted",
            AbandonReason::Internal { .. } => "internal",
        }
    }
}

/// Structured events reported by the pipeline.
///
/// None of the variants carry the job's authorization secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A message was delivered to this worker.
    JobReceived {
        message_id: MessageId,
        receive_count: u32,
        timestamp: DateTime<Utc>,
    },
    LockAcquired {
        message_id: MessageId,
        resource_key: ResourceKey,
        timestamp: DateTime<Utc>,
    },
    /// Another worker holds the resource; the job is left for a later poll.
    LockDenied {
        message_id: MessageId,
        resource_key: ResourceKey,
        timestamp: DateTime<Utc>,
    },
    /// The lock expired or changed hands before release.
    LockLost {
        message_id: MessageId,
        resource_key: ResourceKey,
        timestamp: DateTime<Utc>,
    },
    SigningFailed {
        message_id: MessageId,
        resource_key: ResourceKey,
        attempt: u32,
        category: SigningFailureKind,
        timestamp: DateTime<Utc>,
    },
    /// One pass of fetch -> sign -> store -> acknowledge failed.
    AttemptFailed {
        message_id: MessageId,
        resource_key: ResourceKey,
        attempt: u32,
        /// Last state reached before the failure.
        reached: JobState,
        error: String,
        retryable: bool,
        timestamp: DateTime<Utc>,
    },
    JobSucceeded {
        message_id: MessageId,
        resource_key: ResourceKey,
        output: DocumentLocation,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The artifact was stored but the delivery could no longer be
    /// acknowledged; the message will be redelivered.
    JobUnacknowledged {
        message_id: MessageId,
        resource_key: ResourceKey,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    JobAbandoned {
        message_id: MessageId,
        resource_key: Option<ResourceKey>,
        attempts: u32,
        reason: AbandonReason,
        timestamp: DateTime<Utc>,
    },
    CycleCompleted {
        received: usize,
        succeeded: usize,
        unacknowledged: usize,
        abandoned: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },
    /// Infrastructure failure ended the cycle early.
    CycleAborted {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::JobReceived { timestamp, .. } => *timestamp,
            PipelineEvent::LockAcquired { timestamp, .. } => *timestamp,
            PipelineEvent::LockDenied { timestamp, .. } => *timestamp,
            PipelineEvent::LockLost { timestamp, .. } => *timestamp,
            PipelineEvent::SigningFailed { timestamp, .. } => *timestamp,
            PipelineEvent::AttemptFailed { timestamp, .. } => *timestamp,
            PipelineEvent::JobSucceeded { timestamp, .. } => *timestamp,
            PipelineEvent::JobUnacknowledged { timestamp, .. } => *timestamp,
            PipelineEvent::JobAbandoned { timestamp, .. } => *timestamp,
            PipelineEvent::CycleCompleted { timestamp, .. } => *timestamp,
            PipelineEvent::CycleAborted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the message ID associated with this event, if any.
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            PipelineEvent::JobReceived { message_id, .. }
            | PipelineEvent::LockAcquired { message_id, .. }
            | PipelineEvent::LockDenied { message_id, .. }
            | PipelineEvent::LockLost { message_id, .. }
            | PipelineEvent::SigningFailed { message_id, .. }
            | PipelineEvent::AttemptFailed { message_id, .. }
            | PipelineEvent::JobSucceeded { message_id, .. }
            | PipelineEvent::JobUnacknowledged { message_id, .. }
            | PipelineEvent::JobAbandoned { message_id, .. } => Some(message_id),
            PipelineEvent::CycleCompleted { .. } | PipelineEvent::CycleAborted { .. } => None,
        }
    }

    /// Short event name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::JobReceived { .. } => "job_received",
            PipelineEvent::LockAcquired { .. } => "lock_acquired",
            PipelineEvent::LockDenied { .. } => "lock_denied",
            PipelineEvent::LockLost { .. } => "lock_lost",
            PipelineEvent::SigningFailed { .. } => "signing_failed",
            PipelineEvent::AttemptFailed { .. } => "attempt_failed",
            PipelineEvent::JobSucceeded { .. } => "job_succeeded",
            PipelineEvent::JobUnacknowledged { .. } => "job_unacknowledged",
            PipelineEvent::JobAbandoned { .. } => "job_abandoned",
            PipelineEvent::CycleCompleted { .. } => "cycle_completed",
            PipelineEvent::CycleAborted { .. } => "cycle_aborted",
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::JobReceived {
                message_id,
                receive_count,
                ..
            } => format!("Job {} received (delivery {})", message_id, receive_count),
            PipelineEvent::LockAcquired { resource_key, .. } => {
                format!("Lock acquired on {}", resource_key)
            }
            PipelineEvent::LockDenied { resource_key, .. } => {
                format!("Lock denied on {}", resource_key)
            }
            PipelineEvent::LockLost { resource_key, .. } => {
                format!("Lock on {} lost before release", resource_key)
            }
            PipelineEvent::SigningFailed {
                resource_key,
                attempt,
                category,
                ..
            } => format!(
                "Signing {} failed on attempt {}: {}",
                resource_key, attempt, category
            ),
            PipelineEvent::AttemptFailed {
                resource_key,
                attempt,
                reached,
                error,
                retryable,
                ..
            } => {
                let retry = if *retryable { " (will retry)" } else { "" };
                format!(
                    "Attempt {} on {} failed after {}: {}{}",
                    attempt, resource_key, reached, error, retry
                )
            }
            PipelineEvent::JobSucceeded {
                output,
                attempts,
                duration_ms,
                ..
            } => format!(
                "Signed {} in {}ms ({} attempt(s))",
                output, duration_ms, attempts
            ),
            PipelineEvent::JobUnacknowledged { resource_key, .. } => {
                format!("{} stored but not acknowledged", resource_key)
            }
            PipelineEvent::JobAbandoned {
                message_id, reason, ..
            } => format!("Job {} abandoned: {}", message_id, reason.as_str()),
            PipelineEvent::CycleCompleted {
                received,
                succeeded,
                unacknowledged,
                abandoned,
                skipped,
                ..
            } => format!(
                "Cycle done: {} received, {} succeeded, {} unacknowledged, {} abandoned, {} skipped",
                received, succeeded, unacknowledged, abandoned, skipped
            ),
            PipelineEvent::CycleAborted { reason, .. } => format!("Cycle aborted: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_tag_matches_name() {
        let event = PipelineEvent::JobAbandoned {
            message_id: MessageId("01HZX".into()),
            resource_key: None,
            attempts: 1,
            reason: AbandonReason::NonRetryable {
                error: "authorization rejected by signing device".into(),
            },
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], serde_json::json!(event.name()));
        assert_eq!(value["reason"]["kind"], serde_json::json!("non_retryable"));
    }
}
