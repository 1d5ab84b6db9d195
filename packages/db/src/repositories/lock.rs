//! SurrealDB-backed distributed lock.
//!
//! Each locked resource is a record whose id is the resource key. Creating a
//! record that already exists fails inside the datastore, and an expired
//! record is only taken over by a single conditional update, so every step of
//! acquisition is one atomic statement.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use signer_core::{BoxFuture, DistributedLock, LockError, LockToken, ResourceKey};
use ulid::Ulid;

use crate::schema::LOCK_TABLE;
use crate::{Database, is_write_conflict, now_ms};

/// Internal record type for SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    resource: String,
    owner: String,
    handle: String,
    acquired_at_ms: i64,
    expires_at_ms: i64,
}

// Takes over a record only while its token is expired.
const TAKE_OVER_EXPIRED: &str = r#"
UPDATE type::thing("resource_lock", $key)
CONTENT $record
WHERE expires_at_ms <= $now
RETURN AFTER
"#;

// Compare-and-delete on the ownership handle.
const DELETE_OWNED: &str = r#"
DELETE type::thing("resource_lock", $key)
WHERE handle = $handle
RETURN BEFORE
"#;

/// Distributed lock stored in the `resource_lock` table.
#[derive(Clone)]
pub struct SurrealLock {
    db: Database,
    owner: String,
}

impl SurrealLock {
    /// `owner` identifies this worker in lock records.
    pub fn new(db: Database, owner: impl Into<String>) -> Self {
        Self {
            db,
            owner: owner.into(),
        }
    }

    /// Current holder of a resource, if its token has not expired.
    pub async fn holder(&self, resource_key: &ResourceKey) -> Result<Option<String>, LockError> {
        let record = self.select(resource_key).await?;
        let now = now_ms();
        Ok(record
            .filter(|r| r.expires_at_ms > now)
            .map(|r| r.owner))
    }

    async fn select(&self, resource_key: &ResourceKey) -> Result<Option<LockRecord>, LockError> {
        self.db
            .select((LOCK_TABLE, resource_key.as_str().to_owned()))
            .await
            .map_err(|e| LockError::Unavailable(e.to_string()))
    }

    async fn try_acquire(
        &self,
        resource_key: &ResourceKey,
        ttl: Duration,
    ) -> Result<LockToken, LockError> {
        let now = now_ms();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let record = LockRecord {
            resource: resource_key.as_str().to_owned(),
            owner: self.owner.clone(),
            handle: Ulid::new().to_string(),
            acquired_at_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms),
        };

        let created: Result<Option<LockRecord>, surrealdb::Error> = self
            .db
            .create((LOCK_TABLE, resource_key.as_str().to_owned()))
            .content(record.clone())
            .await;

        let create_err = match created {
            Ok(Some(_)) => return Ok(token_for(resource_key, record)),
            Ok(None) => {
                return Err(LockError::Unavailable(format!(
                    "lock record for {} was not created",
                    resource_key
                )));
            }
            Err(e) => e,
        };

        // The record exists. Reclaim it if its holder crashed or overran its TTL.
        match self.take_over_expired(resource_key, &record, now).await {
            Ok(true) => {
                tracing::debug!("Reclaimed expired lock on {}", resource_key);
                return Ok(token_for(resource_key, record));
            }
            Ok(false) => {}
            Err(e) if is_write_conflict(&e) => {
                tracing::debug!("Lost the race to reclaim {}", resource_key);
                return Err(LockError::Busy(resource_key.clone()));
            }
            Err(e) => return Err(LockError::Unavailable(e.to_string())),
        }

        match self.select(resource_key).await? {
            Some(holder) if holder.expires_at_ms > now_ms() => {
                tracing::debug!("{} is held by {}", resource_key, holder.owner);
                Err(LockError::Busy(resource_key.clone()))
            }
            _ if is_write_conflict(&create_err) => Err(LockError::Busy(resource_key.clone())),
            _ => Err(LockError::Unavailable(create_err.to_string())),
        }
    }

    async fn take_over_expired(
        &self,
        resource_key: &ResourceKey,
        record: &LockRecord,
        now: i64,
    ) -> Result<bool, surrealdb::Error> {
        let mut response = self
            .db
            .query(TAKE_OVER_EXPIRED)
            .bind(("key", resource_key.as_str().to_owned()))
            .bind(("record", record.clone()))
            .bind(("now", now))
            .await?;
        let updated: Vec<LockRecord> = response.take(0)?;
        Ok(updated.iter().any(|r| r.handle == record.handle))
    }

    async fn release_token(&self, token: LockToken) -> Result<(), LockError> {
        let mut response = self
            .db
            .query(DELETE_OWNED)
            .bind(("key", token.resource_key.as_str().to_owned()))
            .bind(("handle", token.handle.clone()))
            .await
            .map_err(|e| LockError::Unavailable(e.to_string()))?;
        let deleted: Vec<LockRecord> = response
            .take(0)
            .map_err(|e| LockError::Unavailable(e.to_string()))?;

        match deleted.first() {
            Some(record) if record.expires_at_ms > now_ms() => Ok(()),
            _ => Err(LockError::Lost(token.resource_key)),
        }
    }
}

impl DistributedLock for SurrealLock {
    fn acquire<'a>(
        &'a self,
        resource_key: &'a ResourceKey,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<LockToken, LockError>> {
        Box::pin(self.try_acquire(resource_key, ttl))
    }

    fn release(&self, token: LockToken) -> BoxFuture<'_, Result<(), LockError>> {
        Box::pin(self.release_token(token))
    }
}

fn token_for(resource_key: &ResourceKey, record: LockRecord) -> LockToken {
    LockToken {
        resource_key: resource_key.clone(),
        owner: record.owner,
        handle: record.handle,
        expires_at: millis_to_datetime(record.expires_at_ms),
    }
}

fn millis_to_datetime(ms: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}
