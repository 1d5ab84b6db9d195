//! `signer-worker`: runs the signing pipeline.

mod config;

use std::error::Error;
use std::sync::Arc;

use actors::{JobProcessor, SupervisorArgs, SupervisorMessage, Telemetry, start_supervisor};
use clap::{Parser, Subcommand};
use db::{Database, SurrealJobQueue, SurrealLock};
use signer_core::{AuthSecret, DocumentLocation, KeySlot, SigningRequest, intake};
use signing::SignerConfig;
use storage::{Storage, StorageConfig};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, ServiceConfig};

#[derive(Parser, Debug)]
#[clap(name = "signer-worker", version, about = "Document signing worker")]
struct CliArgs {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool until interrupted (default).
    Run,

    /// Run a single processing cycle and exit.
    Once,

    /// Queue a signing job. The secret is read from `SIGNING_PIN`.
    Enqueue {
        /// Bucket holding the unsigned document.
        #[clap(long)]
        bucket: String,

        /// Object key of the unsigned document.
        #[clap(long)]
        key: String,

        /// Key slot on the signing device.
        #[clap(long)]
        key_slot: u8,

        /// Target bucket; defaults to `OUTPUT_BUCKET`.
        #[clap(long)]
        output_bucket: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn queue_for(db: &Database, config: &ServiceConfig) -> SurrealJobQueue {
    SurrealJobQueue::new(db.clone()).with_max_message_bytes(config.queue_max_message_bytes)
}

async fn build_processor(
    db: &Database,
    config: &ServiceConfig,
) -> Result<Arc<JobProcessor>, Box<dyn Error>> {
    let blobs = Storage::new(StorageConfig::from_env().map_err(ConfigError::from)?).await?;
    let signer = signing::build_signer(&SignerConfig::from_env().map_err(ConfigError::from)?)?;

    let processor = JobProcessor::new(
        Arc::new(queue_for(db, config)),
        Arc::new(SurrealLock::new(db.clone(), config.worker_id.clone())),
        Arc::new(blobs),
        signer,
        config.processor.clone(),
    )
    .with_telemetry(Telemetry::with_broadcast(1024));

    Ok(Arc::new(processor))
}

async fn run(db: &Database, config: &ServiceConfig) -> Result<(), Box<dyn Error>> {
    if !config.db.is_shared() {
        tracing::warn!(
            "{} is local to this process; locks do not exclude other processes",
            config.db.endpoint
        );
    }

    let processor = build_processor(db, config).await?;
    let (supervisor, handle) = start_supervisor(SupervisorArgs {
        processor,
        worker_count: config.worker_count,
        poll_interval: Some(config.poll_interval),
        worker_prefix: config.worker_id.clone(),
    })
    .await?;

    tracing::info!(
        "Worker {} running {} worker(s), polling every {:?}",
        config.worker_id,
        config.worker_count,
        config.poll_interval
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");

    supervisor.send_message(SupervisorMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

async fn once(db: &Database, config: &ServiceConfig) -> Result<(), Box<dyn Error>> {
    let processor = build_processor(db, config).await?;
    let report = processor.run_cycle().await?;
    tracing::info!(
        "Cycle finished: {} received, {} succeeded, {} unacknowledged, {} abandoned, {} skipped",
        report.received,
        report.succeeded,
        report.unacknowledged,
        report.abandoned,
        report.skipped
    );
    Ok(())
}

async fn enqueue(
    db: &Database,
    config: &ServiceConfig,
    document: DocumentLocation,
    key_slot: KeySlot,
    output_bucket: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let output_bucket = output_bucket
        .or_else(|| config.output_bucket.clone())
        .ok_or_else(|| ConfigError::Invalid("--output-bucket or OUTPUT_BUCKET is required".into()))?;
    let secret = std::env::var("SIGNING_PIN")
        .map_err(|_| ConfigError::Invalid("SIGNING_PIN must be set".into()))?;

    let request = SigningRequest {
        document,
        key_slot,
        auth_secret: AuthSecret::new(secret),
    };
    let queue = queue_for(db, config);
    let message_id = intake::submit(&queue, request, &output_bucket).await?;

    tracing::info!("Queued signing job {}", message_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args = CliArgs::parse();
    let config = ServiceConfig::from_env()?;
    init_tracing(config.log_json);

    let db = db::init(&config.db).await?;

    match cli_args.command.unwrap_or(Command::Run) {
        Command::Run => run(&db, &config).await,
        Command::Once => once(&db, &config).await,
        Command::Enqueue {
            bucket,
            key,
            key_slot,
            output_bucket,
        } => {
            enqueue(
                &db,
                &config,
                DocumentLocation::new(bucket, key),
                KeySlot(key_slot),
                output_bucket,
            )
            .await
        }
    }
}
