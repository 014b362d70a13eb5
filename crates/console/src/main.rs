mod cli;

use crate::cli::Args;
use anyhow::Context;
use clap::Parser;
use ops_console::config::load_console_config;
use ops_console::locator::RecordLocator;
use ops_console::logging::init_tracing;
use ops_console::mirror::{MirrorHandle, MirrorOptions};
use ops_console::remote::RestBackend;
use ops_console::schema::SchemaLoader;
use ops_console::server::{router, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(&args.log_dir, args.log_to_stderr)?;

    info!(
        listen_addr = %args.listen_addr,
        config = %args.config.display(),
        "ops console starting"
    );
    let config = load_console_config(&args.config)?;
    let backend = Arc::new(RestBackend::from_config(&config).context("failed to build backend")?);

    let mirror = MirrorHandle::open(
        backend.clone(),
        MirrorOptions {
            capacity: config.monitor.capacity,
            snapshot_merge: config.monitor.snapshot_merge,
        },
    );
    let shutdown = CancellationToken::new();
    let app_state = AppState {
        mirror: mirror.watch(),
        schema_loader: Arc::new(SchemaLoader::new(backend.clone())),
        schema: Arc::new(RwLock::new(None)),
        graph_style: Arc::new(config.graph),
        locator: Arc::new(RecordLocator::new(backend)),
        shutdown: shutdown.clone(),
    };

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;
    info!(addr = %args.listen_addr, "ops console listening");
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await?;
    info!("ops console shutting down");
    mirror.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown.cancel();
}
