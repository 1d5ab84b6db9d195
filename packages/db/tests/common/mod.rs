use db::{Database, DbConfig, DbError};

/// Fresh in-memory datastore with the schema applied.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(&DbConfig::memory()).await
}
