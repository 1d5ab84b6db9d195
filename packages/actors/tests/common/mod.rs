#![allow(dead_code)]

use std::collections::VecDeque;
use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{JobProcessor, ProcessorConfig, Telemetry};
use bytes::Bytes;
use db::{Database, SurrealJobQueue, SurrealLock};
use signer_core::{
    AckError, AuthSecret, BlobError, BlobStore, BoxFuture, DistributedLock, DocumentLocation,
    EnqueueError, JobDescriptor, JobQueue, KeySlot, LockError, LockToken, MessageId,
    PipelineEvent, ReceiptHandle, ReceiveError, ReceivedMessage, ResourceKey, Signer,
    SigningError,
};
use storage::{Storage, StorageConfig};
use tokio::sync::broadcast;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Retry without waiting so tests stay fast.
pub fn fast_config() -> ProcessorConfig {
    ProcessorConfig {
        max_attempts: 3,
        retry_delay: Duration::from_millis(1),
        ..ProcessorConfig::default()
    }
}

pub fn descriptor(key: &str) -> JobDescriptor {
    JobDescriptor::new(
        DocumentLocation::new("docs", key),
        KeySlot(5),
        AuthSecret::new("valid"),
        "docs",
    )
}

/// Queue that can be told to fail acknowledgements.
pub struct TestQueue {
    pub inner: SurrealJobQueue,
    pub acks: AtomicUsize,
    pub failing_acks: AtomicUsize,
}

impl JobQueue for TestQueue {
    fn enqueue<'a>(
        &'a self,
        job: &'a JobDescriptor,
    ) -> BoxFuture<'a, Result<MessageId, EnqueueError>> {
        self.inner.enqueue(job)
    }

    fn receive(
        &self,
        max_batch: usize,
        visibility_timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<ReceivedMessage>, ReceiveError>> {
        self.inner.receive(max_batch, visibility_timeout)
    }

    fn acknowledge<'a>(
        &'a self,
        receipt: &'a ReceiptHandle,
    ) -> BoxFuture<'a, Result<(), AckError>> {
        Box::pin(async move {
            self.acks.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_acks.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_acks.store(remaining - 1, Ordering::SeqCst);
                return Err(AckError::Unavailable("queue endpoint reset".into()));
            }
            self.inner.acknowledge(receipt).await
        })
    }
}

/// Queue whose backend is unreachable.
pub struct UnreachableQueue;

impl JobQueue for UnreachableQueue {
    fn enqueue<'a>(
        &'a self,
        _job: &'a JobDescriptor,
    ) -> BoxFuture<'a, Result<MessageId, EnqueueError>> {
        Box::pin(async { Err(EnqueueError::Unavailable("connection refused".into())) })
    }

    fn receive(
        &self,
        _max_batch: usize,
        _visibility_timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<ReceivedMessage>, ReceiveError>> {
        Box::pin(async { Err(ReceiveError::Unavailable("connection refused".into())) })
    }

    fn acknowledge<'a>(
        &'a self,
        _receipt: &'a ReceiptHandle,
    ) -> BoxFuture<'a, Result<(), AckError>> {
        Box::pin(async { Err(AckError::Unavailable("connection refused".into())) })
    }
}

/// Lock that counts acquisitions and releases.
pub struct CountingLock {
    pub inner: SurrealLock,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl DistributedLock for CountingLock {
    fn acquire<'a>(
        &'a self,
        resource_key: &'a ResourceKey,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<LockToken, LockError>> {
        Box::pin(async move {
            let token = self.inner.acquire(resource_key, ttl).await?;
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(token)
        })
    }

    fn release(&self, token: LockToken) -> BoxFuture<'_, Result<(), LockError>> {
        Box::pin(async move {
            self.released.fetch_add(1, Ordering::SeqCst);
            self.inner.release(token).await
        })
    }
}

/// Lock service that cannot be reached.
pub struct UnreachableLock;

impl DistributedLock for UnreachableLock {
    fn acquire<'a>(
        &'a self,
        _resource_key: &'a ResourceKey,
        _ttl: Duration,
    ) -> BoxFuture<'a, Result<LockToken, LockError>> {
        Box::pin(async { Err(LockError::Unavailable("lock service timed out".into())) })
    }

    fn release(&self, _token: LockToken) -> BoxFuture<'_, Result<(), LockError>> {
        Box::pin(async { Err(LockError::Unavailable("lock service timed out".into())) })
    }
}

/// Blob store that counts traffic.
pub struct CountingBlobs {
    pub inner: Storage,
    pub fetches: AtomicUsize,
    pub stores: AtomicUsize,
}

impl BlobStore for CountingBlobs {
    fn fetch<'a>(
        &'a self,
        location: &'a DocumentLocation,
    ) -> BoxFuture<'a, Result<Bytes, BlobError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(location).await
        })
    }

    fn store<'a>(
        &'a self,
        location: &'a DocumentLocation,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<(), BlobError>> {
        Box::pin(async move {
            self.stores.fetch_add(1, Ordering::SeqCst);
            self.inner.store(location, bytes).await
        })
    }
}

/// Signer that plays back scripted results, then signs by prefixing.
#[derive(Default)]
pub struct ScriptedSigner {
    pub script: Mutex<VecDeque<Result<Bytes, SigningError>>>,
    pub calls: AtomicUsize,
    pub delay: Mutex<Option<Duration>>,
    pub panic_with: Mutex<Option<&'static str>>,
}

impl ScriptedSigner {
    pub fn push(&self, result: Result<Bytes, SigningError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

impl Signer for ScriptedSigner {
    fn sign<'a>(
        &'a self,
        document: Bytes,
        _key_slot: KeySlot,
        _secret: &'a AuthSecret,
    ) -> BoxFuture<'a, Result<Bytes, SigningError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            // Scripted results play first; a configured panic fires once they run out.
            let scripted = self.script.lock().unwrap().pop_front();
            if let Some(result) = scripted {
                return result;
            }
            let panic_with = *self.panic_with.lock().unwrap();
            if let Some(message) = panic_with {
                panic!("{}", message);
            }
            let mut signed = b"signed:".to_vec();
            signed.extend_from_slice(&document);
            Ok(Bytes::from(signed))
        })
    }
}

/// Real queue, lock and blob store on in-memory backends, wrapped in counters.
pub struct Harness {
    pub db: Database,
    pub queue: Arc<TestQueue>,
    pub lock: Arc<CountingLock>,
    pub blobs: Arc<CountingBlobs>,
    pub signer: Arc<ScriptedSigner>,
    pub telemetry: Telemetry,
    pub events: broadcast::Receiver<PipelineEvent>,
}

impl Harness {
    pub async fn new() -> Result<Self, Box<dyn Error>> {
        let db = db::init(&db::DbConfig::memory()).await?;
        let storage = Storage::new(StorageConfig::memory()).await?;
        let telemetry = Telemetry::with_broadcast(256);
        let events = telemetry.subscribe().ok_or("broadcast telemetry")?;

        Ok(Self {
            queue: Arc::new(TestQueue {
                inner: SurrealJobQueue::new(db.clone()),
                acks: AtomicUsize::new(0),
                failing_acks: AtomicUsize::new(0),
            }),
            lock: Arc::new(CountingLock {
                inner: SurrealLock::new(db.clone(), "test-worker"),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }),
            blobs: Arc::new(CountingBlobs {
                inner: storage,
                fetches: AtomicUsize::new(0),
                stores: AtomicUsize::new(0),
            }),
            signer: Arc::new(ScriptedSigner::default()),
            db,
            telemetry,
            events,
        })
    }

    pub fn processor(&self, config: ProcessorConfig) -> JobProcessor {
        JobProcessor::new(
            self.queue.clone(),
            self.lock.clone(),
            self.blobs.clone(),
            self.signer.clone(),
            config,
        )
        .with_telemetry(self.telemetry.clone())
    }

    /// Upload a source document.
    pub async fn seed(&self, key: &str, body: &'static str) -> Result<(), BlobError> {
        self.blobs
            .inner
            .store(&DocumentLocation::new("docs", key), Bytes::from(body))
            .await
    }

    pub async fn enqueue(&self, key: &str) -> Result<MessageId, EnqueueError> {
        self.queue.inner.enqueue(&descriptor(key)).await
    }

    /// Everything emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}
