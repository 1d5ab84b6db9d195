//! Pipeline telemetry: every event is logged through `tracing` and optionally
//! broadcast to in-process subscribers.

use signer_core::PipelineEvent;
use tokio::sync::broadcast;

#[derive(Clone, Default)]
pub struct Telemetry {
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
}

impl Telemetry {
    /// Log-only telemetry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Telemetry that also broadcasts events on a channel of `capacity`.
    pub fn with_broadcast(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            event_tx: Some(event_tx),
        }
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<PipelineEvent>> {
        self.event_tx.as_ref().map(|tx| tx.subscribe())
    }

    pub fn emit(&self, event: PipelineEvent) {
        log_event(&event);
        if let Some(tx) = &self.event_tx {
            // No receivers is fine.
            let _ = tx.send(event);
        }
    }
}

fn log_event(event: &PipelineEvent) {
    let name = event.name();
    let message_id = event.message_id().map(|id| id.as_str()).unwrap_or("-");

    match event {
        PipelineEvent::JobReceived { .. }
        | PipelineEvent::LockAcquired { .. }
        | PipelineEvent::LockDenied { .. } => {
            tracing::debug!(event = name, message_id, "{}", event.description());
        }
        PipelineEvent::SigningFailed { category, attempt, .. } => {
            tracing::warn!(
                event = name,
                message_id,
                category = category.as_str(),
                attempt,
                "{}",
                event.description()
            );
        }
        PipelineEvent::AttemptFailed {
            attempt, retryable, ..
        } => {
            tracing::warn!(event = name, message_id, attempt, retryable, "{}", event.description());
        }
        PipelineEvent::JobAbandoned {
            attempts, reason, ..
        } => {
            tracing::error!(
                event = name,
                message_id,
                attempts,
                reason = reason.as_str(),
                "{}",
                event.description()
            );
        }
        PipelineEvent::LockLost { .. }
        | PipelineEvent::JobUnacknowledged { .. }
        | PipelineEvent::CycleAborted { .. } => {
            tracing::warn!(event = name, message_id, "{}", event.description());
        }
        PipelineEvent::JobSucceeded { .. } | PipelineEvent::CycleCompleted { .. } => {
            tracing::info!(event = name, message_id, "{}", event.description());
        }
    }
}
