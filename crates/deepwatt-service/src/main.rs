//! deepwatt-service - MQTT ingestion and HTTP API.
//!
//! Run with: `cargo run -p deepwatt-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use deepwatt_service::{AppState, Config, FeedbackPublisher, Listener, api, run_worker};
use deepwatt_store::Store;

/// deepwatt-service - MQTT telemetry ingestion and HTTP query API.
#[derive(Parser, Debug)]
#[command(name = "deepwatt-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deepwatt_service=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // File, then environment, then command line
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env();
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    config.validate()?;

    let store = Store::open(&config.storage.path)?;
    let addr: SocketAddr = config.server.bind.parse()?;
    let queue_capacity = config.mqtt.queue_capacity;
    let state = AppState::new(store, config);

    // Failing to reach the broker at startup is fatal
    let listener = Listener::connect(&state).await?;

    let (tx, rx) = mpsc::channel(queue_capacity);
    let worker = tokio::spawn(run_worker(Arc::clone(&state), rx));
    let feedback = FeedbackPublisher::new(Arc::clone(&state), Arc::new(listener.client())).start();
    let mqtt = tokio::spawn(listener.run(Arc::clone(&state), tx));

    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    info!("Starting server on {}", addr);
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.listener.signal_stop();
    for (name, task) in [("mqtt listener", mqtt), ("ingestion worker", worker)] {
        if let Err(e) = task.await {
            warn!("{} task failed: {}", name, e);
        }
    }
    if let Some(task) = feedback
        && let Err(e) = task.await
    {
        warn!("feedback publisher task failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
