use std::sync::Arc;

use anyhow::Result;
use feedsync_core::{BatchRunner, FeedSyncConfig, RunSettings, run_daemon};
use tokio::signal;

use crate::lock;

pub async fn run(config: &FeedSyncConfig) -> Result<()> {
    // The data directory lock is only held while a run is going on
    let _daemon = lock::acquire_daemon(&config.data_path())?;

    let runner = Arc::new(
        BatchRunner::new(
            super::open_store(config).await?,
            super::publisher(config)?,
            super::fetcher(config)?,
            RunSettings::from(config),
        )
        .with_run_lock(Arc::new(lock::DataDirLock::new(config.data_path()))),
    );

    tracing::info!(
        interval = %humantime::format_duration(config.sync_interval),
        data_dir = %config.data_path().display(),
        "daemon started"
    );

    run_daemon(runner, config.sync_interval, shutdown_signal()).await;

    tracing::info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
