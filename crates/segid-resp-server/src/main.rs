#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use segid::{FjallStore, Registry, SettingsStore};
use server::config::{CliArgs, ServerConfig};
use server::listener::Server;
use server::service::dispatcher::Dispatcher;
use server::settings::Settings;
use server::telemetry::init_telemetry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Set-up is synchronous so that persisted overrides (including `threads`) are
// known before the runtime is built.
fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let mut config = ServerConfig::try_from(args)?;

    std::fs::create_dir_all(&config.data_path)
        .with_context(|| format!("failed to create {}", config.data_path.display()))?;
    let store = Arc::new(
        FjallStore::open(&config.data_path)
            .with_context(|| format!("failed to open store at {}", config.data_path.display()))?,
    );

    let store_path = config.data_path.clone();
    let overlay = config.overlay(store.settings()?);

    let providers = init_telemetry(&config)?;

    for setting in &overlay.applied {
        tracing::info!(%setting, value = %config.get(*setting), "applied persisted setting");
    }
    for (name, error) in &overlay.rejected {
        tracing::warn!(name = %name, %error, "ignored persisted setting");
    }
    if config.data_path != store_path {
        tracing::warn!(
            configured = %config.data_path.display(),
            in_use = %store_path.display(),
            "data_path override cannot relocate the store it is read from"
        );
    }

    let registry = Arc::new(Registry::new(Arc::clone(&store), config.batch_size)?);
    let restored = registry.bootstrap()?;
    tracing::info!(restored, batch_size = config.batch_size, "registry ready");

    let settings = Arc::new(
        Settings::new(config.clone(), Arc::clone(&store))
            .with_log_filter(providers.log_filter.clone()),
    );
    let dispatcher = Dispatcher::new(registry, settings);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.threads)
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;
    let result = runtime.block_on(serve(config, dispatcher));

    providers.shutdown();
    result
}

async fn serve(config: ServerConfig, dispatcher: Dispatcher<FjallStore>) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let server = Server::bind(
        config.server_addr(),
        dispatcher,
        shutdown.clone(),
        config.shutdown_timeout,
    )
    .await
    .with_context(|| format!("failed to listen on {}", config.server_addr()))?;

    log_startup_info(server.local_addr()?, &config);
    tokio::spawn(shutdown_signal(shutdown));

    server.run().await;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: SocketAddr, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting ID service on {} with full config: {:#?}", addr, config);
    } else {
        tracing::info!(
            "Starting ID service on {} with {} threads, batch size {}",
            addr,
            config.threads,
            config.batch_size
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    shutdown.cancel();
}
