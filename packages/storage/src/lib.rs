//! Blob store client for unsigned and signed documents.
//!
//! Backends:
//! - S3-compatible storage in production/staging, one client per bucket
//! - On-disk storage for local dev, one subdirectory per bucket
//! - In-memory storage for tests
//!
//! Thin wrapper around `object_store`, which already provides S3, local
//! filesystem, and in-memory backends.

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use signer_core::{BlobError, BlobStore, BoxFuture, DocumentLocation};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid document location {location}: {reason}")]
    InvalidLocation {
        location: DocumentLocation,
        reason: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

impl From<StorageError> for BlobError {
    fn from(err: StorageError) -> Self {
        BlobError::Transient(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

/// Connection settings shared by every bucket's S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/object_store`)
    ///
    /// S3 env vars (S3-compatible). The bucket comes from each job:
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`); buckets are subdirectories
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional, e.g. `signing/`)
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`StorageConfig::from_env`], reading variables through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StorageError> {
        let var = |name: &str| lookup(name).and_then(non_empty);
        let fs_root = || {
            var("STORAGE_FS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/object_store"))
        };

        let cfg = match var("STORAGE_BACKEND").as_deref() {
            Some("s3") => Self::s3(read_s3_config(&var)?),
            Some("filesystem") | Some("fs") | None => Self::filesystem(fs_root()),
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            prefix: var("STORAGE_PREFIX"),
            ..cfg
        })
    }
}

enum Backend {
    /// One client per bucket, built on first use.
    S3 {
        config: S3Config,
        clients: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
    },
    /// A single store; the bucket becomes the first path segment.
    Shared(Arc<dyn ObjectStore>),
}

/// Multi-bucket document store implementing [`BlobStore`].
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    backend: Arc<Backend>,
    prefix: Option<String>,
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, backend) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (
                StorageKind::S3,
                Backend::S3 {
                    config: s3,
                    clients: Mutex::new(HashMap::new()),
                },
            ),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Backend::Shared(Arc::new(fs)))
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Backend::Shared(Arc::new(mem)))
            }
        };

        tracing::info!("Blob store backend: {}", kind.as_str());

        Ok(Self {
            kind,
            backend: Arc::new(backend),
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    /// Resolve the store and object path for a location.
    async fn resolve(
        &self,
        location: &DocumentLocation,
    ) -> Result<(Arc<dyn ObjectStore>, Path), StorageError> {
        let invalid = |reason| StorageError::InvalidLocation {
            location: location.clone(),
            reason,
        };

        let bucket = location.bucket.trim();
        if bucket.is_empty() {
            return Err(invalid("bucket must not be empty"));
        }
        if bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(invalid("bucket must be a single path segment"));
        }
        let key = location.key.trim_start_matches('/');
        if key.is_empty() {
            return Err(invalid("object key must not be empty"));
        }

        let key = match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}"),
            _ => key.to_string(),
        };

        match self.backend.as_ref() {
            Backend::S3 { config, clients } => {
                let mut clients = clients.lock().await;
                let store = match clients.get(bucket) {
                    Some(store) => store.clone(),
                    None => {
                        tracing::debug!("Building S3 client for bucket {}", bucket);
                        let store: Arc<dyn ObjectStore> =
                            Arc::new(build_s3(config.clone(), bucket)?);
                        clients.insert(bucket.to_string(), store.clone());
                        store
                    }
                };
                Ok((store, Path::from(key)))
            }
            Backend::Shared(store) => Ok((store.clone(), Path::from(format!("{bucket}/{key}")))),
        }
    }

    pub async fn get_bytes(&self, location: &DocumentLocation) -> Result<Bytes, StorageError> {
        let (store, path) = self.resolve(location).await?;
        let res = store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    pub async fn put_bytes(
        &self,
        location: &DocumentLocation,
        bytes: Bytes,
    ) -> Result<(), StorageError> {
        let (store, path) = self.resolve(location).await?;
        store.put(&path, object_store::PutPayload::from(bytes)).await?;
        Ok(())
    }
}

impl BlobStore for Storage {
    fn fetch<'a>(&'a self, location: &'a DocumentLocation) -> BoxFuture<'a, Result<Bytes, BlobError>> {
        Box::pin(async move {
            self.get_bytes(location).await.map_err(|err| match err {
                StorageError::ObjectStore(object_store::Error::NotFound { .. }) => {
                    BlobError::NotFound(location.clone())
                }
                other => other.into(),
            })
        })
    }

    fn store<'a>(
        &'a self,
        location: &'a DocumentLocation,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<(), BlobError>> {
        Box::pin(async move { Ok(self.put_bytes(location, bytes).await?) })
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(var_name: &str, value: Option<String>) -> Result<Option<bool>, StorageError> {
    let Some(v) = value else {
        return Ok(None);
    };

    let parsed = match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

fn read_s3_config(var: &impl Fn(&str) -> Option<String>) -> Result<S3Config, StorageError> {
    let region = var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = var("S3_ENDPOINT");
    let allow_http = match parse_bool("S3_ALLOW_HTTP", var("S3_ALLOW_HTTP"))? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style =
        parse_bool("S3_VIRTUAL_HOSTED_STYLE", var("S3_VIRTUAL_HOSTED_STYLE"))?.unwrap_or(false);

    Ok(S3Config {
        region,
        endpoint,
        allow_http,
        access_key_id: var("AWS_ACCESS_KEY_ID"),
        secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
        session_token: var("AWS_SESSION_TOKEN"),
        virtual_hosted_style,
    })
}

fn build_s3(cfg: S3Config, bucket: &str) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}
