//! Signing module contract.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::job::{AuthSecret, KeySlot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    /// The secret was rejected for the slot.
    #[error("authorization rejected by signing device")]
    InvalidAuth,

    #[error("signing device is busy")]
    DeviceBusy,

    #[error("signing device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Configuration bug; retrying cannot help.
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The device has no such key slot.
    #[error("invalid key slot: {0}")]
    InvalidKeySlot(String),
}

impl SigningError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SigningError::DeviceBusy | SigningError::DeviceUnavailable(_))
    }

    pub fn category(&self) -> SigningFailureKind {
        match self {
            SigningError::InvalidAuth => SigningFailureKind::InvalidAuth,
            SigningError::DeviceBusy => SigningFailureKind::DeviceBusy,
            SigningError::DeviceUnavailable(_) => SigningFailureKind::DeviceUnavailable,
            SigningError::UnsupportedAlgorithm(_) => SigningFailureKind::UnsupportedAlgorithm,
            SigningError::InvalidKeySlot(_) => SigningFailureKind::InvalidKeySlot,
        }
    }
}

/// Signing failure category reported to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningFailureKind {
    InvalidAuth,
    DeviceBusy,
    DeviceUnavailable,
    UnsupportedAlgorithm,
    InvalidKeySlot,
}

impl SigningFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SigningFailureKind::InvalidAuth => "invalid_auth",
            SigningFailureKind::DeviceBusy => "device_busy",
            SigningFailureKind::DeviceUnavailable => "device_unavailable",
            SigningFailureKind::UnsupportedAlgorithm => "unsupported_algorithm",
            SigningFailureKind::InvalidKeySlot => "invalid_key_slot",
        }
    }
}

impl std::fmt::Display for SigningFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque hardware-backed signing capability.
///
/// Implementations may be slow and may share a device with limited
/// concurrent capacity.
pub trait Signer: Send + Sync + 'static {
    fn sign<'a>(
        &'a self,
        document: Bytes,
        key_slot: KeySlot,
        secret: &'a AuthSecret,
    ) -> BoxFuture<'a, Result<Bytes, SigningError>>;
}
