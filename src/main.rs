//! s3-sink
//!
//! Streams a file or standard input into an S3-compatible bucket as a
//! multipart upload. Ctrl+C or SIGTERM aborts the upload.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3_sink::upload::{reader_stream, Disposition, DEFAULT_READ_SIZE};
use s3_sink::{Config, S3Client, S3Sink};

#[derive(Parser, Debug)]
#[command(name = "s3-sink", version, about = "Stream data into S3 with multipart uploads")]
struct Args {
    /// Destination path, relative to the configured key prefix
    key: String,

    /// Read from this file instead of standard input
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// JSON config file; the environment is used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Part size in MiB (minimum 5)
    #[arg(long)]
    part_size_mib: Option<usize>,

    /// Part uploads kept in flight
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "s3_sink=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };
    if let Some(mib) = args.part_size_mib {
        config.upload.min_part_size = mib.saturating_mul(1024 * 1024);
    }
    if let Some(concurrency) = args.concurrency {
        config.upload.max_concurrent_parts = concurrency;
    }
    config.validate().context("Invalid upload settings")?;

    tracing::info!("Starting s3-sink v{}", env!("CARGO_PKG_VERSION"));
    if let Some(endpoint) = &config.storage.endpoint {
        tracing::info!("S3 endpoint: {}", endpoint);
    }
    tracing::info!("S3 bucket: {}", config.storage.bucket);

    // Initialize S3 client
    let s3_client = S3Client::new(&config.storage).await;
    s3_client.verify_bucket(&config.storage.bucket).await;

    let sink = S3Sink::from_config(Arc::new(s3_client), &config);

    let summary = match &args.file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            sink.write_until(&args.key, reader_stream(file, DEFAULT_READ_SIZE), shutdown_signal())
                .await
        }
        None => {
            let stdin = tokio::io::stdin();
            sink.write_until(&args.key, reader_stream(stdin, DEFAULT_READ_SIZE), shutdown_signal())
                .await
        }
    };

    let summary = summary.map_err(|e| {
        tracing::error!("Upload of {} failed: {}", args.key, e);
        e
    })?;

    match summary.disposition {
        Disposition::Completed => {
            tracing::info!(
                "Uploaded {} bytes in {} parts to s3://{}/{}",
                summary.bytes,
                summary.parts,
                sink.bucket(),
                summary.key
            );
            Ok(())
        }
        Disposition::Canceled => anyhow::bail!("Upload of {} was canceled", summary.key),
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, aborting upload...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, aborting upload...");
        },
    }
}
