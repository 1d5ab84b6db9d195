//! Distributed lock contract: exclusive, time-bounded ownership of a named
//! resource across processes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::job::ResourceKey;

/// Proof of exclusive ownership of a resource until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub resource_key: ResourceKey,
    /// Identity of the worker holding the lock.
    pub owner: String,
    /// Unique per acquisition; release compares on it.
    pub handle: String,
    pub expires_at: DateTime<Utc>,
}

impl LockToken {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("resource {0} is locked by another worker")]
    Busy(ResourceKey),

    /// The token expired or was taken over before release.
    #[error("lock on {0} was lost before release")]
    Lost(ResourceKey),

    #[error("lock service is unavailable: {0}")]
    Unavailable(String),
}

/// Non-blocking distributed mutual exclusion.
pub trait DistributedLock: Send + Sync + 'static {
    /// Try to take the lock; returns [`LockError::Busy`] without waiting when
    /// another unexpired token exists.
    fn acquire<'a>(
        &'a self,
        resource_key: &'a ResourceKey,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<LockToken, LockError>>;

    /// Give the lock back. [`LockError::Lost`] means the caller must not
    /// assume it held exclusive access for the whole window.
    fn release(&self, token: LockToken) -> BoxFuture<'_, Result<(), LockError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expiry_is_inclusive() {
        let now = Utc::now();
        let token = LockToken {
            resource_key: ResourceKey::for_location(&crate::DocumentLocation::new("b", "k")),
            owner: "worker-1".into(),
            handle: "h".into(),
            expires_at: now,
        };
        assert!(token.is_expired_at(now));
        assert!(!token.is_expired_at(now - chrono::Duration::milliseconds(1)));
    }
}
