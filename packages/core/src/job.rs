//! Job domain types for signing work items.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Suffix appended to the source key to form the signed artifact's key.
pub const SIGNED_SUFFIX: &str = ".signed";

/// Unique identifier for a queued message, using ULID for chronological sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new unique message ID.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key slot on the signing device holding the private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeySlot(pub u8);

impl KeySlot {
    /// Slot identifier as the two-digit hex form used by PIV tooling.
    pub fn as_hex(self) -> String {
        format!("{:02x}", self.0)
    }
}

impl std::fmt::Display for KeySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authorization secret (PIN) unlocking a key slot.
///
/// Serializes transparently so it survives the queue round trip, but its
/// `Debug` output is redacted and it has no `Display` impl.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthSecret(String);

impl AuthSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the raw secret. Only signing adapters should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AuthSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthSecret(***)")
    }
}

/// Bucket + key identifying a document in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub bucket: String,
    pub key: String,
}

impl DocumentLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for DocumentLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Name of the resource a job locks, derived from its document location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn for_location(location: &DocumentLocation) -> Self {
        Self(location.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while decoding or validating a job descriptor.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("descriptor field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("descriptor field `{field}` is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// The unit of work: sign one document with one key slot.
///
/// Wire format is a JSON object whose field names must round-trip exactly:
/// `documentBucket`, `documentKey`, `keySlot`, `authSecret`, `outputBucket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub document_bucket: String,
    pub document_key: String,
    pub key_slot: KeySlot,
    pub auth_secret: AuthSecret,
    pub output_bucket: String,
}

impl JobDescriptor {
    pub fn new(
        document: DocumentLocation,
        key_slot: KeySlot,
        auth_secret: AuthSecret,
        output_bucket: impl Into<String>,
    ) -> Self {
        Self {
            document_bucket: document.bucket,
            document_key: document.key,
            key_slot,
            auth_secret,
            output_bucket: output_bucket.into(),
        }
    }

    /// Decode and validate a descriptor from its wire form.
    pub fn from_wire(body: &str) -> Result<Self, DescriptorError> {
        let descriptor: Self = serde_json::from_str(body)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Encode the descriptor into its wire form.
    pub fn to_wire(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        check_bucket("documentBucket", &self.document_bucket)?;
        if self.document_key.trim().is_empty() {
            return Err(DescriptorError::EmptyField("documentKey"));
        }
        if self.document_key.trim_start_matches('/').is_empty() {
            return Err(DescriptorError::InvalidField {
                field: "documentKey",
                reason: "must name an object, not only slashes",
            });
        }
        check_bucket("outputBucket", &self.output_bucket)?;
        if self.auth_secret.is_empty() {
            return Err(DescriptorError::EmptyField("authSecret"));
        }
        Ok(())
    }

    pub fn document(&self) -> DocumentLocation {
        DocumentLocation::new(&self.document_bucket, &self.document_key)
    }

    /// Where the signed artifact is written.
    pub fn output(&self) -> DocumentLocation {
        DocumentLocation::new(
            &self.output_bucket,
            format!("{}{}", self.document_key, SIGNED_SUFFIX),
        )
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::for_location(&self.document())
    }
}

/// Buckets are a single non-empty path segment.
fn check_bucket(field: &'static str, bucket: &str) -> Result<(), DescriptorError> {
    let bucket = bucket.trim();
    if bucket.is_empty() {
        return Err(DescriptorError::EmptyField(field));
    }
    if bucket.contains('/') || bucket == "." || bucket == ".." {
        return Err(DescriptorError::InvalidField {
            field,
            reason: "must be a single path segment",
        });
    }
    Ok(())
}

/// Progress of one processing attempt through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Received,
    Locked,
    Fetched,
    Signed,
    Stored,
    Acknowledged,
    /// Terminal: retries exhausted or a non-retryable failure.
    Abandoned,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::Locked => "locked",
            JobState::Fetched => "fetched",
            JobState::Signed => "signed",
            JobState::Stored => "stored",
            JobState::Acknowledged => "acknowledged",
            JobState::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Unsigned,
    Signed,
}

/// Binary payload flowing through fetch -> sign -> store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentArtifact {
    pub location: DocumentLocation,
    pub bytes: Bytes,
    pub state: ArtifactState,
}

impl DocumentArtifact {
    pub fn unsigned(location: DocumentLocation, bytes: Bytes) -> Self {
        Self {
            location,
            bytes,
            state: ArtifactState::Unsigned,
        }
    }

    /// Replace the payload with its signed form, addressed at `output`.
    pub fn into_signed(self, signed: Bytes, output: DocumentLocation) -> Self {
        Self {
            location: output,
            bytes: signed,
            state: ArtifactState::Signed,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.state == ArtifactState::Signed
    }
}
