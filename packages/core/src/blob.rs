//! Blob store contract.

use bytes::Bytes;

use crate::BoxFuture;
use crate::job::DocumentLocation;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(DocumentLocation),

    #[error("blob store error: {0}")]
    Transient(String),
}

/// Fetch and store documents by bucket + key.
pub trait BlobStore: Send + Sync + 'static {
    fn fetch<'a>(&'a self, location: &'a DocumentLocation) -> BoxFuture<'a, Result<Bytes, BlobError>>;

    /// Write `bytes`, overwriting any existing object.
    fn store<'a>(
        &'a self,
        location: &'a DocumentLocation,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<(), BlobError>>;
}
