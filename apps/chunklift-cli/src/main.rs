//! Command-line uploader.
//!
//! Connects to a chunklift server, uploads one file with resumable
//! chunked transfer, and renders hash and upload progress.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use chunklift_uploader::{
    ServerConnection, UploadCoordinator, UploadError, UploadEvent, UploadState, UploaderConfig,
    WsConnection,
};

#[derive(Parser)]
#[command(name = "chunklift", about = "Resumable chunked file upload")]
struct Args {
    /// File to upload.
    file: PathBuf,

    /// WebSocket endpoint of the transfer server.
    #[arg(long, default_value = "ws://127.0.0.1:1234")]
    server: String,

    /// Number of chunks to split into.
    #[arg(long, default_value_t = chunklift_transfer::DEFAULT_CHUNK_COUNT)]
    chunks: usize,

    /// Maximum concurrent chunk transmissions.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let conn = Arc::new(
        WsConnection::connect(&args.server)
            .await
            .with_context(|| format!("failed to connect to {}", args.server))?,
    );

    let config = UploaderConfig {
        chunk_count: args.chunks,
        max_concurrent_chunks: args.concurrency,
        ..UploaderConfig::default()
    };
    let mut coordinator = UploadCoordinator::new(
        Arc::clone(&conn) as Arc<dyn ServerConnection>,
        config,
    );
    let events = coordinator.take_events().expect("fresh coordinator");
    let coordinator = Arc::new(coordinator);

    // Progress rendering: one bar for hashing, one for the transfer.
    let bars = MultiProgress::new();
    let style = ProgressStyle::with_template("{msg:>8} [{bar:40.cyan/blue}] {pos:>3}%")
        .expect("static template")
        .progress_chars("=> ");
    let hash_bar = bars.add(ProgressBar::new(100).with_style(style.clone()).with_message("hash"));
    let upload_bar = bars.add(ProgressBar::new(100).with_style(style).with_message("upload"));

    let render = {
        let coordinator = Arc::clone(&coordinator);
        let mut events = events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    UploadEvent::HashProgress { percentage } => {
                        hash_bar.set_position(percentage as u64);
                    }
                    UploadEvent::ChunkProgress { .. } | UploadEvent::StateChanged(_) => {
                        let snapshot = coordinator.snapshot();
                        if snapshot.hash_percentage >= 100.0 {
                            hash_bar.set_position(100);
                        }
                        upload_bar.set_position(snapshot.aggregate_percentage as u64);
                        if snapshot.state == UploadState::Success {
                            upload_bar.set_position(100);
                        }
                    }
                    UploadEvent::ChunkFailed { index, error } => {
                        tracing::warn!(index, "chunk transmission failed: {error}");
                    }
                    UploadEvent::Completed | UploadEvent::Failed { .. } => {}
                }
            }
        })
    };

    coordinator.select_file(&args.file)?;
    let result = coordinator.start_upload().await;

    // The render task holds its own coordinator handle; stop it explicitly.
    render.abort();
    let _ = render.await;
    conn.close().await;

    match result {
        Ok(()) => {
            println!("{} uploaded", args.file.display());
            Ok(())
        }
        Err(UploadError::TransferIncomplete { failed }) => {
            anyhow::bail!(
                "upload incomplete: chunks {failed:?} were not acknowledged; rerun to resume"
            )
        }
        Err(e) => Err(e).context("upload failed"),
    }
}
