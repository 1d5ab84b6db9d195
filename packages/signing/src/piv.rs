//! Hardware-token signing through the `yubico-piv-tool` CLI.
//!
//! The document is streamed to the tool on stdin and the signature is read
//! back from stdout. PIN verification and signing run in one invocation so
//! the verified PIN state never outlives the call.

use std::process::Stdio;

use bytes::Bytes;
use signer_core::{AuthSecret, BoxFuture, KeySlot, Signer, SigningError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::PivConfig;

/// Key algorithms the tool can sign with.
pub const SUPPORTED_ALGORITHMS: &[&str] = &[
    "RSA1024", "RSA2048", "RSA3072", "RSA4096", "ECCP256", "ECCP384",
];

pub const SUPPORTED_HASHES: &[&str] = &["SHA1", "SHA256", "SHA384", "SHA512"];

/// PIV key slots: authentication, signature, key management, card
/// authentication (9a, 9c, 9d, 9e) and the retired key management slots
/// 82 through 95.
pub fn is_piv_slot(slot: KeySlot) -> bool {
    matches!(slot.0, 0x9a | 0x9c | 0x9d | 0x9e | 0x82..=0x95)
}

pub struct PivToolSigner {
    config: PivConfig,
}

impl PivToolSigner {
    pub fn new(config: PivConfig) -> Self {
        Self { config }
    }

    fn check_request(&self, key_slot: KeySlot) -> Result<(), SigningError> {
        if !is_piv_slot(key_slot) {
            return Err(SigningError::InvalidKeySlot(format!(
                "{} (0x{}) is not a PIV slot",
                key_slot,
                key_slot.as_hex()
            )));
        }
        if !SUPPORTED_ALGORITHMS.contains(&self.config.algorithm.as_str()) {
            return Err(SigningError::UnsupportedAlgorithm(self.config.algorithm.clone()));
        }
        if !SUPPORTED_HASHES.contains(&self.config.hash.as_str()) {
            return Err(SigningError::UnsupportedAlgorithm(format!(
                "{} with {}",
                self.config.algorithm, self.config.hash
            )));
        }
        Ok(())
    }

    // NOTE: the PIN travels in argv; the tool has no non-interactive stdin option for it.
    fn command(&self, key_slot: KeySlot, secret: &AuthSecret) -> Command {
        let mut cmd = Command::new(&self.config.tool_path);
        cmd.args(["-a", "verify-pin", "-P"])
            .arg(secret.expose())
            .args(["-a", "sign", "-s"])
            .arg(key_slot.as_hex())
            .arg("-A")
            .arg(&self.config.algorithm)
            .arg("-H")
            .arg(&self.config.hash)
            .args(["-i", "-", "-o", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(
        &self,
        document: Bytes,
        key_slot: KeySlot,
        secret: &AuthSecret,
    ) -> Result<Bytes, SigningError> {
        self.check_request(key_slot)?;

        let mut child = self.command(key_slot, secret).spawn().map_err(|e| {
            SigningError::DeviceUnavailable(format!(
                "failed to start {}: {e}",
                self.config.tool_path.display()
            ))
        })?;

        // Feed stdin from its own task so a full stdout pipe cannot deadlock us.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let result = stdin.write_all(&document).await;
                drop(stdin);
                result
            })
        });

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                SigningError::DeviceUnavailable(format!(
                    "signing tool timed out after {:?}",
                    self.config.timeout
                ))
            })?
            .map_err(|e| SigningError::DeviceUnavailable(format!("signing tool failed: {e}")))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if output.status.success() => {
                    return Err(SigningError::DeviceUnavailable(format!(
                        "failed to stream document: {e}"
                    )));
                }
                Ok(Err(_)) => {}
                Err(e) => {
                    return Err(SigningError::DeviceUnavailable(format!(
                        "document writer panicked: {e}"
                    )));
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(
                status = ?output.status.code(),
                slot = %key_slot.as_hex(),
                "yubico-piv-tool failed: {}",
                stderr.trim()
            );
            return Err(classify_tool_failure(&stderr));
        }
        if output.stdout.is_empty() {
            return Err(SigningError::DeviceUnavailable(
                "signing tool produced no output".to_string(),
            ));
        }

        Ok(Bytes::from(output.stdout))
    }
}

impl Signer for PivToolSigner {
    fn sign<'a>(
        &'a self,
        document: Bytes,
        key_slot: KeySlot,
        secret: &'a AuthSecret,
    ) -> BoxFuture<'a, Result<Bytes, SigningError>> {
        Box::pin(self.run(document, key_slot, secret))
    }
}

/// Map the tool's diagnostics onto a signing error.
pub fn classify_tool_failure(stderr: &str) -> SigningError {
    let lower = stderr.to_ascii_lowercase();
    let detail = stderr.trim().to_string();

    if lower.contains("verifying pin")
        || lower.contains("wrong pin")
        || lower.contains("pin code blocked")
        || lower.contains("authentication error")
    {
        SigningError::InvalidAuth
    } else if lower.contains("sharing violation")
        || lower.contains("busy")
        || lower.contains("in use")
    {
        SigningError::DeviceBusy
    } else if lower.contains("unknown algorithm")
        || lower.contains("invalid algorithm")
        || lower.contains("algorithm not supported")
    {
        SigningError::UnsupportedAlgorithm(detail)
    } else {
        SigningError::DeviceUnavailable(detail)
    }
}
