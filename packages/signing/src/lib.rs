//! Signing module bindings.
//!
//! Two implementations of [`signer_core::Signer`] are available, chosen by
//! configuration:
//! - [`PivToolSigner`] drives a hardware token through `yubico-piv-tool`
//! - [`RemoteSigner`] calls a network-attached signing manager
//!
//! Either one is wrapped in a [`SigningGate`] that caps concurrent use of the
//! device.

use std::sync::Arc;

use signer_core::Signer;

mod config;
mod gate;
mod piv;
mod remote;

pub use config::{
    PivConfig, RemoteConfig, SaturationPolicy, SignerBackend, SignerConfig, SignerConfigError,
};
pub use gate::SigningGate;
pub use piv::{
    PivToolSigner, SUPPORTED_ALGORITHMS, SUPPORTED_HASHES, classify_tool_failure, is_piv_slot,
};
pub use remote::{RemoteSigner, classify_status};

/// Build the configured signer behind its concurrency gate.
pub fn build_signer(config: &SignerConfig) -> Result<Arc<dyn Signer>, SignerConfigError> {
    let inner: Arc<dyn Signer> = match &config.backend {
        SignerBackend::Piv(piv) => {
            if !SUPPORTED_ALGORITHMS.contains(&piv.algorithm.as_str()) {
                tracing::warn!(
                    "PIV_ALGORITHM={} is not supported; every signing attempt will be abandoned",
                    piv.algorithm
                );
            }
            Arc::new(PivToolSigner::new(piv.clone()))
        }
        SignerBackend::Remote(remote) => Arc::new(
            RemoteSigner::new(remote.clone())
                .map_err(|e| SignerConfigError::InvalidConfig(format!("http client: {e}")))?,
        ),
    };

    tracing::info!(
        "Signer backend: {} (max {} concurrent, {:?} when saturated)",
        config.backend.as_str(),
        config.max_concurrent,
        config.saturation
    );

    Ok(Arc::new(SigningGate::new(
        inner,
        config.max_concurrent,
        config.saturation,
    )))
}
