//! Service configuration read from the environment.
//!
//! Blob store and signer settings live with their crates
//! (`StorageConfig::from_env`, `SignerConfig::from_env`); this covers the
//! database, queue, worker pool and processor.

use std::time::Duration;

use actors::ProcessorConfig;
use db::{DEFAULT_MAX_MESSAGE_BYTES, DbConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Signer(#[from] signing::SignerConfigError),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db: DbConfig,
    pub queue_max_message_bytes: usize,
    /// Lock owner identity for this process.
    pub worker_id: String,
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub processor: ProcessorConfig,
    /// Target bucket for intake; required by `enqueue`.
    pub output_bucket: Option<String>,
    pub log_json: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).and_then(non_empty);
        let number = |name: &str, default: u64| -> Result<u64, ConfigError> {
            match var(name) {
                Some(v) => v
                    .parse()
                    .map_err(|_| ConfigError::Invalid(format!("invalid number for {name}={v}"))),
                None => Ok(default),
            }
        };

        let mut db = DbConfig::default();
        if let Some(endpoint) = var("DATABASE_URL") {
            db.endpoint = endpoint;
        }
        if let Some(namespace) = var("DATABASE_NS") {
            db = db.with_namespace(namespace);
        }
        if let Some(database) = var("DATABASE_DB") {
            db = db.with_database(database);
        }
        match (var("DATABASE_USER"), var("DATABASE_PASS")) {
            (Some(user), Some(pass)) => db = db.with_credentials(user, pass),
            (None, None) => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "DATABASE_USER and DATABASE_PASS must be set together".into(),
                ));
            }
        }

        let worker_count = number("WORKER_COUNT", 2)? as usize;
        if worker_count == 0 {
            return Err(ConfigError::Invalid("WORKER_COUNT must be at least 1".into()));
        }
        let max_attempts = number("MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid("MAX_ATTEMPTS must be at least 1".into()));
        }

        let processor = ProcessorConfig {
            batch_size: number("BATCH_SIZE", 10)? as usize,
            job_concurrency: number("JOB_CONCURRENCY", 4)?.max(1) as usize,
            visibility_timeout: Duration::from_secs(number("VISIBILITY_TIMEOUT_SECS", 300)?),
            lock_ttl: Duration::from_secs(number("LOCK_TTL_SECS", 120)?),
            max_attempts: u32::try_from(max_attempts)
                .map_err(|_| ConfigError::Invalid(format!("MAX_ATTEMPTS={max_attempts} is too large")))?,
            retry_delay: Duration::from_millis(number("RETRY_DELAY_MS", 250)?),
        };
        if processor.lock_ttl.is_zero() {
            return Err(ConfigError::Invalid("LOCK_TTL_SECS must be positive".into()));
        }

        Ok(Self {
            db,
            queue_max_message_bytes: number(
                "QUEUE_MAX_MESSAGE_BYTES",
                DEFAULT_MAX_MESSAGE_BYTES as u64,
            )? as usize,
            worker_id: var("WORKER_ID").unwrap_or_else(|| format!("signer-{}", ulid::Ulid::new())),
            worker_count,
            poll_interval: Duration::from_secs(number("POLL_INTERVAL_SECS", 60)?.max(1)),
            processor,
            output_bucket: var("OUTPUT_BUCKET"),
            log_json: var("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() -> Result<(), ConfigError> {
        let cfg = ServiceConfig::from_vars(vars(&[]))?;
        assert_eq!(cfg.db.endpoint, "mem://");
        assert_eq!(cfg.db.namespace, "signing");
        assert_eq!(cfg.queue_max_message_bytes, 256 * 1024);
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.processor.batch_size, 10);
        assert_eq!(cfg.processor.max_attempts, 5);
        assert_eq!(cfg.processor.lock_ttl, Duration::from_secs(120));
        assert!(cfg.worker_id.starts_with("signer-"));
        assert!(cfg.output_bucket.is_none());
        assert!(!cfg.log_json);
        Ok(())
    }

    #[test]
    fn overrides() -> Result<(), ConfigError> {
        let cfg = ServiceConfig::from_vars(vars(&[
            ("DATABASE_URL", "ws://surreal:8000"),
            ("DATABASE_USER", "root"),
            ("DATABASE_PASS", "secret"),
            ("WORKER_ID", "host-a"),
            ("WORKER_COUNT", "4"),
            ("MAX_ATTEMPTS", "2"),
            ("RETRY_DELAY_MS", "10"),
            ("OUTPUT_BUCKET", "signed"),
            ("LOG_FORMAT", "JSON"),
        ]))?;
        assert!(cfg.db.is_shared());
        assert_eq!(cfg.db.credentials, Some(("root".into(), "secret".into())));
        assert_eq!(cfg.worker_id, "host-a");
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.processor.max_attempts, 2);
        assert_eq!(cfg.processor.retry_delay, Duration::from_millis(10));
        assert_eq!(cfg.output_bucket.as_deref(), Some("signed"));
        assert!(cfg.log_json);
        Ok(())
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(ServiceConfig::from_vars(vars(&[("WORKER_COUNT", "0")])).is_err());
        assert!(ServiceConfig::from_vars(vars(&[("MAX_ATTEMPTS", "0")])).is_err());
        assert!(ServiceConfig::from_vars(vars(&[("BATCH_SIZE", "lots")])).is_err());
        assert!(ServiceConfig::from_vars(vars(&[("DATABASE_USER", "root")])).is_err());
    }
}
