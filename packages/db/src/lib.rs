//! SurrealDB integration for the signing pipeline.
//!
//! This crate provides the durable job queue and the distributed lock. Both
//! are plain handles over a shared [`Database`], so any number of workers can
//! be wired to the same datastore.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a shared SurrealDB server

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use repositories::{DEFAULT_MAX_MESSAGE_BYTES, SurrealJobQueue, SurrealLock};
pub use schema::{LOCK_TABLE, QUEUE_TABLE, init_schema};

/// Connect with the given configuration and make sure the schema exists.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A transaction aborted because a concurrent one touched the same record.
pub(crate) fn is_write_conflict(err: &surrealdb::Error) -> bool {
    err.to_string().contains("can be retried")
}
