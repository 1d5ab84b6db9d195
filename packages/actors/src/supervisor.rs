//! Supervisor actor owning the worker pool.

use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};

use crate::messages::{SupervisorMessage, WorkerMessage};
use crate::processor::{CycleError, JobProcessor};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Supervisor arguments.
pub struct SupervisorArgs {
    pub processor: Arc<JobProcessor>,
    /// Number of workers to keep running.
    pub worker_count: usize,
    /// Per-worker polling cadence; `None` for on-demand cycles only.
    pub poll_interval: Option<Duration>,
    /// Prefix for worker IDs, usually the host identity.
    pub worker_prefix: String,
}

struct WorkerSlot {
    worker_id: String,
    actor: ActorRef<WorkerMessage>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    processor: Arc<JobProcessor>,
    poll_interval: Option<Duration>,
    workers: Vec<WorkerSlot>,
    /// Round-robin cursor for on-demand cycles.
    next_worker: usize,
    /// Workers restarted after a failure.
    pub restarts: u64,
    shutting_down: bool,
}

impl SupervisorState {
    fn position(&self, id: ActorId) -> Option<usize> {
        self.workers.iter().position(|slot| slot.actor.get_id() == id)
    }
}

async fn spawn_worker(
    myself: &ActorRef<SupervisorMessage>,
    state: &SupervisorState,
    worker_id: String,
) -> Result<WorkerSlot, ActorProcessingErr> {
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        processor: state.processor.clone(),
        poll_interval: state.poll_interval,
    };

    let (actor, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    Ok(WorkerSlot { worker_id, actor })
}

/// Supervisor actor that keeps the worker pool alive.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting signing supervisor with {} worker(s)", args.worker_count);

        let mut state = SupervisorState {
            processor: args.processor,
            poll_interval: args.poll_interval,
            workers: Vec::with_capacity(args.worker_count),
            next_worker: 0,
            restarts: 0,
            shutting_down: false,
        };

        for i in 1..=args.worker_count {
            let worker_id = format!("{}-worker-{}", args.worker_prefix, i);
            let slot = spawn_worker(&myself, &state, worker_id).await?;
            state.workers.push(slot);
        }

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::RunCycle { reply } => {
                if state.workers.is_empty() {
                    let _ = reply.send(Err(CycleError::NoWorker));
                    return Ok(());
                }

                let index = state.next_worker % state.workers.len();
                state.next_worker = index + 1;
                let slot = &state.workers[index];

                if let Err(ractor::MessagingErr::SendErr(WorkerMessage::RunCycle { reply })) =
                    slot.actor.send_message(WorkerMessage::RunCycle { reply })
                {
                    tracing::warn!("Worker {} is not accepting messages", slot.worker_id);
                    let _ = reply.send(Err(CycleError::NoWorker));
                }
            }

            SupervisorMessage::ListWorkers { reply } => {
                let _ = reply.send(state.workers.iter().map(|s| s.actor.clone()).collect());
            }

            SupervisorMessage::Subscribe { sender } => {
                // Forward from the processor's channel to the subscriber's
                if let Some(mut rx) = state.processor.telemetry().subscribe() {
                    tokio::spawn(async move {
                        while let Ok(event) = rx.recv().await {
                            if sender.send(event).is_err() {
                                break;
                            }
                        }
                    });
                } else {
                    tracing::warn!("Telemetry broadcast is disabled; subscription ignored");
                }
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                state.shutting_down = true;
                for slot in &state.workers {
                    let _ = slot.actor.send_message(WorkerMessage::Shutdown);
                }
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, err) => {
                let Some(index) = state.position(cell.get_id()) else {
                    return Ok(());
                };
                let worker_id = state.workers[index].worker_id.clone();
                tracing::error!("Worker {} failed: {}", worker_id, err);

                if state.shutting_down {
                    state.workers.remove(index);
                    return Ok(());
                }

                let slot = spawn_worker(&myself, state, worker_id.clone()).await?;
                state.workers[index] = slot;
                state.restarts += 1;
                tracing::info!("Restarted worker {}", worker_id);
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(index) = state.position(cell.get_id()) {
                    let slot = state.workers.remove(index);
                    tracing::info!("Worker {} stopped: {:?}", slot.worker_id, reason);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start the supervisor and its workers.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    Actor::spawn(None, Supervisor, args).await
}
