//! Repository implementations for the queue and lock tables.

mod job_queue;
mod lock;

pub use job_queue::{DEFAULT_MAX_MESSAGE_BYTES, SurrealJobQueue};
pub use lock::SurrealLock;
