use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use relay_bus::EventBus;
use relay_watcher::SessionWatcher;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod ws;

#[derive(Debug, Parser)]
#[command(name = "relay-server")]
#[command(about = "WebSocket relay between an agent and browser tabs")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,
    /// JSONL file mirroring every published event across restarts.
    #[arg(long)]
    event_log: Option<PathBuf>,
    /// Agent session transcript to tail for permission prompts.
    #[arg(long)]
    session_log: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<EventBus>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let cli = Cli::parse();

    let bus = match &cli.event_log {
        Some(path) => match EventBus::with_log(path).await {
            Ok(bus) => bus,
            Err(error) => {
                warn!(path = %path.display(), %error, "event log unavailable, running in-memory");
                EventBus::new()
            }
        },
        None => EventBus::new(),
    };
    let bus = Arc::new(bus);

    let watcher = cli.session_log.as_ref().map(|path| {
        let watcher = SessionWatcher::new(path, Arc::clone(&bus));
        let runner = watcher.clone();
        tokio::spawn(async move { runner.run().await });
        info!(path = %path.display(), "watching session log");
        watcher
    });

    let state = AppState {
        bus: Arc::clone(&bus),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws::handle_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, "relay-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    bus.close().await;

    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "relay-server"
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
