//! Process-wide ceiling on concurrent signing invocations.

use std::sync::Arc;

use bytes::Bytes;
use signer_core::{AuthSecret, BoxFuture, KeySlot, Signer, SigningError};
use tokio::sync::{Semaphore, TryAcquireError};

use crate::config::SaturationPolicy;

/// Wraps a signer so at most `max_concurrent` calls reach it at once.
pub struct SigningGate {
    inner: Arc<dyn Signer>,
    permits: Arc<Semaphore>,
    policy: SaturationPolicy,
}

impl SigningGate {
    pub fn new(inner: Arc<dyn Signer>, max_concurrent: usize, policy: SaturationPolicy) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            policy,
        }
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn gated(
        &self,
        document: Bytes,
        key_slot: KeySlot,
        secret: &AuthSecret,
    ) -> Result<Bytes, SigningError> {
        let _permit = match self.policy {
            SaturationPolicy::Wait => self
                .permits
                .acquire()
                .await
                .map_err(|_| SigningError::DeviceUnavailable("signing gate closed".to_string()))?,
            SaturationPolicy::Reject => match self.permits.try_acquire() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    tracing::debug!("Signing ceiling reached, rejecting request");
                    return Err(SigningError::DeviceBusy);
                }
                Err(TryAcquireError::Closed) => {
                    return Err(SigningError::DeviceUnavailable(
                        "signing gate closed".to_string(),
                    ));
                }
            },
        };

        self.inner.sign(document, key_slot, secret).await
    }
}

impl Signer for SigningGate {
    fn sign<'a>(
        &'a self,
        document: Bytes,
        key_slot: KeySlot,
        secret: &'a AuthSecret,
    ) -> BoxFuture<'a, Result<Bytes, SigningError>> {
        Box::pin(self.gated(document, key_slot, secret))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Holds each call for a while and records peak concurrency.
    #[derive(Default)]
    struct SlowSigner {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Signer for SlowSigner {
        fn sign<'a>(
            &'a self,
            document: Bytes,
            _key_slot: KeySlot,
            _secret: &'a AuthSecret,
        ) -> BoxFuture<'a, Result<Bytes, SigningError>> {
            Box::pin(async move {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(document)
            })
        }
    }

    #[tokio::test]
    async fn wait_policy_serializes_calls() {
        let inner = Arc::new(SlowSigner::default());
        let gate = SigningGate::new(inner.clone(), 1, SaturationPolicy::Wait);
        let secret = AuthSecret::new("123456");

        let (a, b, c) = tokio::join!(
            gate.sign(Bytes::from("a"), KeySlot(1), &secret),
            gate.sign(Bytes::from("b"), KeySlot(1), &secret),
            gate.sign(Bytes::from("c"), KeySlot(1), &secret),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(inner.peak.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn reject_policy_fails_fast_with_device_busy() {
        let inner = Arc::new(SlowSigner::default());
        let gate = SigningGate::new(inner, 1, SaturationPolicy::Reject);
        let secret = AuthSecret::new("123456");

        let (first, second) = tokio::join!(
            gate.sign(Bytes::from("a"), KeySlot(1), &secret),
            gate.sign(Bytes::from("b"), KeySlot(1), &secret),
        );
        assert!(first.is_ok());
        assert_eq!(second, Err(SigningError::DeviceBusy));
        assert!(SigningError::DeviceBusy.is_retryable());
    }
}
