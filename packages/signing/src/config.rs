//! Signer configuration read from the environment.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SignerConfigError {
    #[error("invalid signer config: {0}")]
    InvalidConfig(String),
}

/// What to do when every signing permit is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaturationPolicy {
    /// Queue until a permit frees up.
    Wait,
    /// Fail fast with `SigningError::DeviceBusy`.
    Reject,
}

#[derive(Debug, Clone)]
pub struct PivConfig {
    pub tool_path: PathBuf,
    pub algorithm: String,
    pub hash: String,
    pub timeout: Duration,
}

impl Default for PivConfig {
    fn default() -> Self {
        Self {
            tool_path: PathBuf::from("yubico-piv-tool"),
            algorithm: "RSA2048".to_string(),
            hash: "SHA256".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the signing manager, e.g. `http://hsm.internal:8080`.
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum SignerBackend {
    Piv(PivConfig),
    Remote(RemoteConfig),
}

impl SignerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerBackend::Piv(_) => "piv",
            SignerBackend::Remote(_) => "remote",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub backend: SignerBackend,
    /// Process-wide ceiling on concurrent signing invocations.
    pub max_concurrent: usize,
    pub saturation: SaturationPolicy,
}

impl SignerConfig {
    pub fn piv(config: PivConfig) -> Self {
        Self {
            backend: SignerBackend::Piv(config),
            max_concurrent: 1,
            saturation: SaturationPolicy::Wait,
        }
    }

    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self {
            backend: SignerBackend::Remote(RemoteConfig {
                endpoint: endpoint.into(),
                timeout: Duration::from_secs(30),
            }),
            max_concurrent: 1,
            saturation: SaturationPolicy::Wait,
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `SIGNER_BACKEND`: `piv` (default) or `remote`
    /// - `PIV_TOOL_PATH` (default: `yubico-piv-tool`)
    /// - `PIV_ALGORITHM` (default: `RSA2048`), `PIV_HASH` (default: `SHA256`)
    /// - `SIGNER_ENDPOINT` (required when backend is `remote`)
    /// - `SIGNER_TIMEOUT_SECS` (default: 30)
    /// - `SIGNER_MAX_CONCURRENT` (default: 1)
    /// - `SIGNER_SATURATION`: `wait` (default) or `reject`
    pub fn from_env() -> Result<Self, SignerConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`SignerConfig::from_env`], reading variables through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SignerConfigError> {
        let var = |name: &str| lookup(name).and_then(non_empty);

        let timeout = Duration::from_secs(parse_number(&var, "SIGNER_TIMEOUT_SECS", 30)?);

        let backend = match var("SIGNER_BACKEND").as_deref() {
            Some("piv") | None => {
                let defaults = PivConfig::default();
                SignerBackend::Piv(PivConfig {
                    tool_path: var("PIV_TOOL_PATH")
                        .map(PathBuf::from)
                        .unwrap_or(defaults.tool_path),
                    algorithm: var("PIV_ALGORITHM").unwrap_or(defaults.algorithm),
                    hash: var("PIV_HASH").unwrap_or(defaults.hash),
                    timeout,
                })
            }
            Some("remote") => {
                let endpoint = var("SIGNER_ENDPOINT").ok_or_else(|| {
                    SignerConfigError::InvalidConfig(
                        "SIGNER_ENDPOINT is required for remote backend".into(),
                    )
                })?;
                SignerBackend::Remote(RemoteConfig {
                    endpoint: endpoint.trim_end_matches('/').to_string(),
                    timeout,
                })
            }
            Some(other) => {
                return Err(SignerConfigError::InvalidConfig(format!(
                    "unsupported SIGNER_BACKEND={other} (expected piv|remote)"
                )));
            }
        };

        let max_concurrent = parse_number(&var, "SIGNER_MAX_CONCURRENT", 1)? as usize;
        if max_concurrent == 0 {
            return Err(SignerConfigError::InvalidConfig(
                "SIGNER_MAX_CONCURRENT must be at least 1".into(),
            ));
        }

        let saturation = match var("SIGNER_SATURATION")
            .map(|v| v.to_ascii_lowercase())
            .as_deref()
        {
            Some("wait") | None => SaturationPolicy::Wait,
            Some("reject") => SaturationPolicy::Reject,
            Some(other) => {
                return Err(SignerConfigError::InvalidConfig(format!(
                    "unsupported SIGNER_SATURATION={other} (expected wait|reject)"
                )));
            }
        };

        Ok(Self {
            backend,
            max_concurrent,
            saturation,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<u64, SignerConfigError> {
    match var(name) {
        Some(v) => v.parse().map_err(|_| {
            SignerConfigError::InvalidConfig(format!("invalid number for {name}={v}"))
        }),
        None => Ok(default),
    }
}
