//! The job processor: one cycle receives a batch and drives every job through
//! lock -> fetch -> sign -> store -> acknowledge with bounded retries.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{FutureExt, StreamExt, stream};
use signer_core::{
    AbandonReason, AckError, BlobError, BlobStore, DistributedLock, DocumentArtifact,
    JobDescriptor, JobQueue, JobState, LockError, MessageId, PipelineEvent, ReceiveError,
    ReceivedMessage, ResourceKey, Signer, SigningError,
};

use crate::telemetry::Telemetry;

/// Tuning knobs for [`JobProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Max messages per receive.
    pub batch_size: usize,
    /// Jobs of one batch processed at the same time.
    pub job_concurrency: usize,
    pub visibility_timeout: Duration,
    /// Must exceed the worst-case fetch + sign + store time.
    pub lock_ttl: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            job_concurrency: 4,
            visibility_timeout: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(120),
            max_attempts: 5,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Why a job was left alone this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another worker holds the resource.
    LockBusy,
    LockUnavailable(String),
}

/// Final result for one received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { attempts: u32 },
    /// The artifact is stored but the receipt went stale; the message will be
    /// redelivered.
    StoredUnacknowledged { attempts: u32 },
    Skipped(SkipReason),
    Abandoned { reason: AbandonReason, attempts: u32 },
}

/// Counts per outcome for one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub received: usize,
    pub succeeded: usize,
    pub unacknowledged: usize,
    pub abandoned: usize,
    pub skipped: usize,
    pub outcomes: Vec<(MessageId, JobOutcome)>,
}

impl CycleReport {
    fn record(&mut self, message_id: MessageId, outcome: JobOutcome) {
        match &outcome {
            JobOutcome::Succeeded { .. } => self.succeeded += 1,
            JobOutcome::StoredUnacknowledged { .. } => self.unacknowledged += 1,
            JobOutcome::Skipped(_) => self.skipped += 1,
            JobOutcome::Abandoned { .. } => self.abandoned += 1,
        }
        self.outcomes.push((message_id, outcome));
    }

    pub fn outcome(&self, message_id: &MessageId) -> Option<&JobOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == message_id)
            .map(|(_, outcome)| outcome)
    }
}

/// Infrastructure failures that end a cycle early.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to receive jobs: {0}")]
    Receive(#[from] ReceiveError),

    /// Jobs already in flight finished; their results are in `report`.
    #[error("lock service unavailable: {reason}")]
    LockUnavailable { reason: String, report: CycleReport },

    #[error("no worker available to run the cycle")]
    NoWorker,
}

/// Failure of one step inside an attempt.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("fetch failed: {0}")]
    Fetch(BlobError),

    #[error("signing failed: {0}")]
    Sign(SigningError),

    #[error("store failed: {0}")]
    Store(BlobError),

    #[error("acknowledge failed: {0}")]
    Acknowledge(AckError),
}

impl StepError {
    /// Last state the attempt reached before failing.
    pub fn reached(&self) -> JobState {
        match self {
            StepError::Fetch(_) => JobState::Locked,
            StepError::Sign(_) => JobState::Fetched,
            StepError::Store(_) => JobState::Signed,
            StepError::Acknowledge(_) => JobState::Stored,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Sign(err) => err.is_retryable(),
            StepError::Fetch(_) | StepError::Store(_) | StepError::Acknowledge(_) => true,
        }
    }
}

/// Composes queue, lock, blob store and signer into the signing pipeline.
///
/// Cheap to share behind an `Arc`; [`JobProcessor::run_cycle`] may run
/// concurrently from several workers.
pub struct JobProcessor {
    queue: Arc<dyn JobQueue>,
    lock: Arc<dyn DistributedLock>,
    blobs: Arc<dyn BlobStore>,
    signer: Arc<dyn Signer>,
    config: ProcessorConfig,
    telemetry: Telemetry,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        lock: Arc<dyn DistributedLock>,
        blobs: Arc<dyn BlobStore>,
        signer: Arc<dyn Signer>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            lock,
            blobs,
            signer,
            config,
            telemetry: Telemetry::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Receive one batch and process it.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let messages = match self
            .queue
            .receive(self.config.batch_size, self.config.visibility_timeout)
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                self.telemetry.emit(PipelineEvent::CycleAborted {
                    reason: err.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(CycleError::Receive(err));
            }
        };

        let mut report = CycleReport {
            received: messages.len(),
            ..CycleReport::default()
        };

        let results: Vec<(MessageId, JobOutcome)> = stream::iter(messages)
            .map(|message| async move {
                let message_id = message.message_id().clone();
                let outcome = self.process_message(&message).await;
                (message_id, outcome)
            })
            .buffer_unordered(self.config.job_concurrency.max(1))
            .collect()
            .await;

        let mut lock_failure = None;
        for (message_id, outcome) in results {
            if let JobOutcome::Skipped(SkipReason::LockUnavailable(reason)) = &outcome {
                lock_failure.get_or_insert_with(|| reason.clone());
            }
            report.record(message_id, outcome);
        }

        if let Some(reason) = lock_failure {
            self.telemetry.emit(PipelineEvent::CycleAborted {
                reason: format!("lock service unavailable: {reason}"),
                timestamp: Utc::now(),
            });
            return Err(CycleError::LockUnavailable { reason, report });
        }

        self.telemetry.emit(PipelineEvent::CycleCompleted {
            received: report.received,
            succeeded: report.succeeded,
            unacknowledged: report.unacknowledged,
            abandoned: report.abandoned,
            skipped: report.skipped,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    async fn process_message(&self, message: &ReceivedMessage) -> JobOutcome {
        let message_id = message.message_id();
        self.telemetry.emit(PipelineEvent::JobReceived {
            message_id: message_id.clone(),
            receive_count: message.receive_count,
            timestamp: Utc::now(),
        });

        let descriptor = match message.descriptor() {
            Ok(descriptor) => descriptor,
            Err(err) => {
                let reason = AbandonReason::MalformedDescriptor {
                    error: err.to_string(),
                };
                self.abandon(message_id, None, 0, reason.clone());
                return JobOutcome::Abandoned {
                    reason,
                    attempts: 0,
                };
            }
        };

        let resource_key = descriptor.resource_key();
        let token = match self.lock.acquire(&resource_key, self.config.lock_ttl).await {
            Ok(token) => token,
            Err(LockError::Busy(_)) => {
                self.telemetry.emit(PipelineEvent::LockDenied {
                    message_id: message_id.clone(),
                    resource_key,
                    timestamp: Utc::now(),
                });
                return JobOutcome::Skipped(SkipReason::LockBusy);
            }
            Err(err) => {
                tracing::warn!("Could not lock {}: {}", resource_key, err);
                return JobOutcome::Skipped(SkipReason::LockUnavailable(err.to_string()));
            }
        };

        self.telemetry.emit(PipelineEvent::LockAcquired {
            message_id: message_id.clone(),
            resource_key: resource_key.clone(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        // Lives outside the unwound future so a panic still reports the attempt count.
        let attempts = AtomicU32::new(0);
        let outcome = AssertUnwindSafe(self.run_attempts(
            message,
            &descriptor,
            &resource_key,
            started,
            &attempts,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let attempts = attempts.load(Ordering::SeqCst);
            let reason = AbandonReason::Internal {
                error: panic_message(panic.as_ref()),
            };
            self.abandon(message_id, Some(resource_key.clone()), attempts, reason.clone());
            JobOutcome::Abandoned { reason, attempts }
        });

        if started.elapsed() > self.config.lock_ttl {
            tracing::warn!(
                "Processing {} took {:?}, longer than the {:?} lock TTL",
                resource_key,
                started.elapsed(),
                self.config.lock_ttl
            );
        }

        match self.lock.release(token).await {
            Ok(()) => {}
            Err(LockError::Lost(_)) => {
                self.telemetry.emit(PipelineEvent::LockLost {
                    message_id: message_id.clone(),
                    resource_key,
                    timestamp: Utc::now(),
                });
            }
            Err(err) => tracing::warn!("Failed to release lock on {}: {}", resource_key, err),
        }

        outcome
    }

    /// The bounded retry loop. Every attempt reruns the whole sequence.
    async fn run_attempts(
        &self,
        message: &ReceivedMessage,
        descriptor: &JobDescriptor,
        resource_key: &ResourceKey,
        started: Instant,
        attempts_started: &AtomicU32,
    ) -> JobOutcome {
        let message_id = message.message_id();
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            attempts_started.store(attempt, Ordering::SeqCst);
            match self.attempt(message, descriptor).await {
                Ok(()) => {
                    self.telemetry.emit(PipelineEvent::JobSucceeded {
                        message_id: message_id.clone(),
                        resource_key: resource_key.clone(),
                        output: descriptor.output(),
                        attempts: attempt,
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    return JobOutcome::Succeeded { attempts: attempt };
                }
                Err(StepError::Acknowledge(AckError::StaleReceipt(receipt))) => {
                    tracing::debug!("Receipt {} is stale", receipt);
                    self.telemetry.emit(PipelineEvent::JobUnacknowledged {
                        message_id: message_id.clone(),
                        resource_key: resource_key.clone(),
                        attempts: attempt,
                        timestamp: Utc::now(),
                    });
                    return JobOutcome::StoredUnacknowledged { attempts: attempt };
                }
                Err(err) => {
                    if let StepError::Sign(signing) = &err {
                        self.telemetry.emit(PipelineEvent::SigningFailed {
                            message_id: message_id.clone(),
                            resource_key: resource_key.clone(),
                            attempt,
                            category: signing.category(),
                            timestamp: Utc::now(),
                        });
                    }

                    let retryable = err.is_retryable();
                    self.telemetry.emit(PipelineEvent::AttemptFailed {
                        message_id: message_id.clone(),
                        resource_key: resource_key.clone(),
                        attempt,
                        reached: err.reached(),
                        error: err.to_string(),
                        retryable,
                        timestamp: Utc::now(),
                    });

                    if !retryable {
                        let reason = AbandonReason::NonRetryable {
                            error: err.to_string(),
                        };
                        self.abandon(message_id, Some(resource_key.clone()), attempt, reason.clone());
                        return JobOutcome::Abandoned {
                            reason,
                            attempts: attempt,
                        };
                    }

                    last_error = err.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        let reason = AbandonReason::RetriesExhausted { last_error };
        self.abandon(message_id, Some(resource_key.clone()), max_attempts, reason.clone());
        JobOutcome::Abandoned {
            reason,
            attempts: max_attempts,
        }
    }

    /// fetch -> sign -> store -> acknowledge.
    async fn attempt(
        &self,
        message: &ReceivedMessage,
        descriptor: &JobDescriptor,
    ) -> Result<(), StepError> {
        let source = descriptor.document();
        let bytes = self.blobs.fetch(&source).await.map_err(StepError::Fetch)?;
        let artifact = DocumentArtifact::unsigned(source, bytes);

        let signed = self
            .signer
            .sign(artifact.bytes.clone(), descriptor.key_slot, &descriptor.auth_secret)
            .await
            .map_err(StepError::Sign)?;
        let artifact = artifact.into_signed(signed, descriptor.output());

        self.blobs
            .store(&artifact.location, artifact.bytes.clone())
            .await
            .map_err(StepError::Store)?;

        self.queue
            .acknowledge(&message.receipt)
            .await
            .map_err(StepError::Acknowledge)
    }

    fn abandon(
        &self,
        message_id: &MessageId,
        resource_key: Option<ResourceKey>,
        attempts: u32,
        reason: AbandonReason,
    ) {
        self.telemetry.emit(PipelineEvent::JobAbandoned {
            message_id: message_id.clone(),
            resource_key,
            attempts,
            reason,
            timestamp: Utc::now(),
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("pipeline panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("pipeline panicked: {message}")
    } else {
        "pipeline panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_errors_report_reached_state() {
        let sign = StepError::Sign(SigningError::InvalidAuth);
        assert_eq!(sign.reached(), JobState::Fetched);
        assert!(!sign.is_retryable());

        let busy = StepError::Sign(SigningError::DeviceBusy);
        assert!(busy.is_retryable());

        let store = StepError::Store(BlobError::Transient("503".into()));
        assert_eq!(store.reached(), JobState::Signed);
        assert!(store.is_retryable());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "pipeline panicked: boom");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "pipeline panicked");
    }
}
