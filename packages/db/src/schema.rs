//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Table holding queued signing jobs.
pub const QUEUE_TABLE: &str = "signing_job";

/// Table holding resource locks, one record per locked resource key.
pub const LOCK_TABLE: &str = "resource_lock";

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(QUEUE_SCHEMA).await?.check()?;
    db.query(LOCK_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Queue table schema.
///
/// Timestamps are unix milliseconds so visibility checks compare plain ints.
const QUEUE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS signing_job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS message_id ON signing_job TYPE string;
DEFINE FIELD IF NOT EXISTS body ON signing_job TYPE string;
DEFINE FIELD IF NOT EXISTS visible_at_ms ON signing_job TYPE int;
DEFINE FIELD IF NOT EXISTS receipt ON signing_job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS receive_count ON signing_job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS enqueued_at_ms ON signing_job TYPE int;

-- Polling looks for messages whose visibility deadline has passed
DEFINE INDEX IF NOT EXISTS signing_job_visible ON signing_job FIELDS visible_at_ms;
"#;

/// Lock table schema.
const LOCK_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS resource_lock SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS resource ON resource_lock TYPE string;
DEFINE FIELD IF NOT EXISTS owner ON resource_lock TYPE string;
DEFINE FIELD IF NOT EXISTS handle ON resource_lock TYPE string;
DEFINE FIELD IF NOT EXISTS acquired_at_ms ON resource_lock TYPE int;
DEFINE FIELD IF NOT EXISTS expires_at_ms ON resource_lock TYPE int;
"#;
