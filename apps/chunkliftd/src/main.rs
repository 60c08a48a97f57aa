//! chunklift transfer server entry point.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use chunklift_server::{ServerConfig, TransferHandler, TransferServer};
use chunklift_store::ChunkStore;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting chunklift server"
    );

    let config = config::Config::load()?;
    tracing::info!(port = config.port, upload_dir = %config.upload_path().display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let store = Arc::new(ChunkStore::new(config.upload_path())?);
    let server = TransferServer::new(
        ServerConfig { port: config.port },
        TransferHandler::new(store),
    );

    let runner = Arc::clone(&server);
    tokio::select! {
        result = runner.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
