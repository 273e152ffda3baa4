//! Buzzel - remote build cache server.

use anyhow::Context;
use buzzel_cache::{DiskBackend, EvictionCache, MemBackend, S3Backend};
use buzzel_core::Backend;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use crate::commands::{Cli, Commands};
use crate::config::{LogConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.overrides()).context("failed to load configuration")?;
    init_tracing(&config.log)?;

    let backend: Arc<dyn Backend> = match cli.command {
        Commands::Disk { .. } => {
            let disk = DiskBackend::new(&config.cache.disk.dir);
            info!(dir = %disk.root_dir().display(), "using disk cache");
            Arc::new(disk)
        }
        Commands::Mem => {
            info!("using mem cache");
            Arc::new(MemBackend::new())
        }
        Commands::S3 { .. } => {
            let s3 = S3Backend::new(config.s3_options())
                .await
                .context("failed to open s3 bucket")?;
            info!(bucket = %s3.bucket(), "using s3 cache");
            Arc::new(s3)
        }
    };

    let cache: Arc<dyn Backend> = if config.cache.max > 0 {
        Arc::new(EvictionCache::new(backend, config.cache.max))
    } else {
        backend
    };

    let listener = TcpListener::bind(&config.cache.addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.cache.addr))?;
    info!(
        addr = %listener.local_addr()?,
        max = config.cache.max,
        "starting cache server"
    );

    buzzel_api::serve(listener, cache, shutdown_signal()).await?;
    info!("cache server stopped");
    Ok(())
}

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .with_context(|| format!("invalid log level {:?}", log.level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.pretty {
        builder.init();
    } else {
        builder.json().init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutting down");
}
