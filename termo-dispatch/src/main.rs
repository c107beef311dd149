use std::path::PathBuf;

use clap::Parser;
use termo_dispatch::api::{self, AppState};
use termo_dispatch::collector::run_collector;
use termo_dispatch::watchdog::run_watchdog;
use termo_dispatch::{
    Config, EdgeReceiver, HostState, LinkConfig, MemoryStore, MockEdgeReceiver, SeriesStore,
    SqliteStore, StorageConfig, TcpEdgeReceiver, UdpEdgeReceiver,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "termo-dispatch")]
#[command(about = "Termo telemetry host")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "termo-dispatch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,termo_dispatch=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(
        http_addr = %config.server.http_addr,
        gap_threshold = config.session.gap_threshold,
        liveness_timeout_secs = config.session.liveness_timeout_secs,
        "Starting termo-dispatch"
    );

    match config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            let store = MemoryStore::default();
            run_dispatcher(config, store).await?;
        }
        StorageConfig::Sqlite { ref path } => {
            info!(path = ?path, "Using SQLite storage");
            let store = SqliteStore::new(path).await?;
            run_dispatcher(config, store).await?;
        }
    }

    Ok(())
}

async fn run_dispatcher<S>(config: Config, store: S) -> color_eyre::Result<()>
where
    S: SeriesStore + Clone,
{
    let state = HostState::new(config.session.session_config());

    match config.link {
        LinkConfig::Mock {
            device_count,
            sample_interval_ms,
            drop_rate,
        } => {
            info!(device_count, sample_interval_ms, drop_rate, "Using mock edge receiver");
            let receiver =
                MockEdgeReceiver::new(device_count, sample_interval_ms, drop_rate, state.clone());
            run_edge_receiver(receiver, config, store, state).await
        }
        LinkConfig::Tcp { addr } => {
            info!(%addr, "Using TCP edge receiver");
            let receiver = TcpEdgeReceiver::new(addr, state.clone());
            run_edge_receiver(receiver, config, store, state).await
        }
        LinkConfig::Udp { addr } => {
            info!(%addr, "Using UDP edge receiver");
            let idle_timeout = config.session.session_config().liveness_timeout;
            let receiver = UdpEdgeReceiver::new(addr, idle_timeout, state.clone());
            run_edge_receiver(receiver, config, store, state).await
        }
    }
}

async fn run_edge_receiver<E, S>(
    edge_receiver: E,
    config: Config,
    store: S,
    state: HostState,
) -> color_eyre::Result<()>
where
    E: EdgeReceiver,
    S: SeriesStore + Clone,
{
    let cancel = CancellationToken::new();

    let edge_rx = edge_receiver.start(cancel.clone()).await?;

    let watchdog_handle = tokio::spawn(run_watchdog(
        state.clone(),
        config.session.sweep_interval(),
        cancel.clone(),
    ));

    let collector_handle = tokio::spawn(run_collector(edge_rx, store.clone(), cancel.clone()));

    // HTTP server
    let http_addr = config.server.http_addr;
    let app = api::router(AppState {
        host: state,
        store,
    });
    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    cancel.cancel();

    // Wait for background tasks to complete
    let _ = watchdog_handle.await;
    let _ = collector_handle.await;

    info!("termo-dispatch shut down complete");
    Ok(())
}
