mod commands;
mod config;
mod control;
mod registry;
mod server;
mod session;
mod sink;
mod state;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use commands::{CommandOrchestrator, StatusCallback};
use config::GatewayConfig;
use registry::DeviceRegistry;
use sink::SinkClient;
use state::GatewayState;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "avl_gateway=info".into())
}

/// Console logging always; a daily-rolling file alongside when `LOG_DIR` is
/// set. The returned guard keeps the file writer flushing until exit.
fn init_logging(config: &GatewayConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    match &config.log_dir {
        Some(dir) => {
            let file = tracing_appender::rolling::daily(dir, "avl-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let config = GatewayConfig::default();
    let _log_guard = init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        control = %config.control_addr,
        sink = %config.sink_url,
        "AVL gateway starting"
    );

    let registry = Arc::new(DeviceRegistry::new());
    let sink = Arc::new(SinkClient::new(&config));
    let callback = StatusCallback::new(&config);
    let commands = Arc::new(CommandOrchestrator::new(
        registry.clone(),
        &config,
        Some(callback),
    ));
    let state = Arc::new(GatewayState {
        config,
        registry,
        commands: commands.clone(),
        sink: sink.clone(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sink_task = tokio::spawn(sink.run(shutdown_rx.clone()));
    tokio::spawn(commands.run_timeout_sweeper(shutdown_rx.clone()));

    let control_task = {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = control::run_control_server(state, shutdown).await {
                error!("control endpoint failed: {e:#}");
                std::process::exit(1);
            }
        })
    };

    let server_task = {
        let state = state.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_tcp_server(state, shutdown).await {
                error!("tcp server failed: {e:#}");
                std::process::exit(1);
            }
        })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    // Acceptor and control plane stop first, then the sink flushes.
    let _ = server_task.await;
    let _ = control_task.await;
    let _ = sink_task.await;
    info!("shutdown complete");
}
