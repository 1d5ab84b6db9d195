//! Message types for actor communication.

use ractor::{ActorRef, RpcReplyPort};
use signer_core::PipelineEvent;

use crate::processor::{CycleError, CycleReport};

/// Reply to an on-demand cycle.
pub type CycleReply = RpcReplyPort<Result<CycleReport, CycleError>>;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Scheduled poll; runs a cycle and schedules the next one.
    Poll,

    /// Run one cycle now and reply with its report.
    RunCycle { reply: CycleReply },

    /// Shutdown the worker.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Run one cycle on the next worker, round-robin.
    RunCycle { reply: CycleReply },

    /// Current worker handles.
    ListWorkers {
        reply: RpcReplyPort<Vec<ActorRef<WorkerMessage>>>,
    },

    /// Forward pipeline events to `sender`.
    Subscribe {
        sender: tokio::sync::broadcast::Sender<PipelineEvent>,
    },

    /// Shutdown all workers.
    Shutdown,
}
