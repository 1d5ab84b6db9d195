//! Actor system for the signing pipeline.
//!
//! This crate provides the job processor and the Ractor-based worker pool
//! that drives it.
//!
//! # Architecture
//!
//! - `JobProcessor` - Runs one processing cycle: receive, lock, fetch, sign,
//!   store, acknowledge
//! - `WorkerActor` - Polls through a shared processor on a fixed cadence
//! - `Supervisor` - Owns the workers, restarts failed ones, and routes
//!   on-demand cycles
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobProcessor, SupervisorArgs, SupervisorMessage, start_supervisor};
//!
//! let processor = Arc::new(JobProcessor::new(queue, lock, blobs, signer, config));
//! let (supervisor, handle) = start_supervisor(SupervisorArgs {
//!     processor,
//!     worker_count: 2,
//!     poll_interval: Some(Duration::from_secs(60)),
//!     worker_prefix: "host-a".into(),
//! })
//! .await?;
//!
//! supervisor.send_message(SupervisorMessage::Shutdown)?;
//! ```

mod messages;
mod processor;
mod supervisor;
mod telemetry;
mod worker_actor;

pub use messages::{CycleReply, SupervisorMessage, WorkerMessage};
pub use processor::{
    CycleError, CycleReport, JobOutcome, JobProcessor, ProcessorConfig, SkipReason, StepError,
};
pub use supervisor::{Supervisor, SupervisorArgs, SupervisorState, start_supervisor};
pub use telemetry::Telemetry;
pub use worker_actor::{WorkerActor, WorkerActorState, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
