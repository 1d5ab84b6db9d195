//! Worker actor that runs processing cycles on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::WorkerMessage;
use crate::processor::JobProcessor;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    pub processor: Arc<JobProcessor>,
    /// `None` disables scheduled polling; cycles then only run on demand.
    pub poll_interval: Option<Duration>,
    /// Cycles completed so far.
    pub cycles: u64,
    /// Whether the worker should continue running.
    pub running: bool,
}

/// Worker actor arguments.
#[derive(Clone)]
pub struct WorkerArgs {
    pub worker_id: String,
    pub processor: Arc<JobProcessor>,
    pub poll_interval: Option<Duration>,
}

/// Worker actor that polls the queue through its [`JobProcessor`].
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        if args.poll_interval.is_some() {
            myself.send_message(WorkerMessage::Poll)?;
        }

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            processor: args.processor,
            poll_interval: args.poll_interval,
            cycles: 0,
            running: true,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.running {
                    return Ok(());
                }

                run_logged(state).await;

                // Cycles on one worker never overlap.
                if let Some(interval) = state.poll_interval {
                    let myself_clone = myself.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(interval).await;
                        let _ = myself_clone.send_message(WorkerMessage::Poll);
                    });
                }
            }

            WorkerMessage::RunCycle { reply } => {
                let result = state.processor.run_cycle().await;
                state.cycles += 1;
                let _ = reply.send(result);
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                state.running = false;
                myself.stop(None);
            }
        }

        Ok(())
    }
}

async fn run_logged(state: &mut WorkerActorState) {
    match state.processor.run_cycle().await {
        Ok(report) if report.received > 0 => {
            tracing::debug!(
                worker = %state.worker_id,
                "Cycle processed {} job(s)",
                report.received
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(worker = %state.worker_id, "Cycle failed: {}", e),
    }
    state.cycles += 1;
}
