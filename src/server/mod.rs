// src/server/mod.rs

//! The HTTP front door: serves the WebSocket upgrade endpoint, runs the hub
//! loop, and turns OS signals into a graceful shutdown broadcast.

use crate::config::Config;
use crate::core::hub::LogSink;
use crate::core::{Command, Hub};
use anyhow::Result;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tracing::{error, info};

mod ws;

// Re-export the WebSocket transport adapter.
pub use ws::{WsTransport, WsUpgrade};

/// The main server startup function. Runs until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let sink: LogSink = Arc::new(|line| info!(target: "hub", "{line}"));
    let hub = Arc::new(Hub::new(config.hub.clone(), sink));

    // A built-in liveness handler: echoes the body back to the sender only.
    hub.register_handler("echo", |conn, body| async move {
        let id = conn.id();
        conn.send(id, &Command::new("echo", body)).await;
    });

    let (shutdown_tx, _) = broadcast::channel(1);

    let hub_task = tokio::spawn({
        let hub = hub.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        async move { hub.run(shutdown_rx).await }
    });

    let app = Router::new()
        .route("/ws", get(ws::upgrade_handler))
        .with_state(hub.clone());

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("Listening on {}:{}", config.host, config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await?;

    match hub_task.await {
        Ok(Ok(())) => info!("Hub loop stopped."),
        Ok(Err(err)) => error!("Hub loop exited with error: {err}"),
        Err(err) => error!("Hub loop panicked: {err:?}"),
    }

    info!("Server shutdown complete.");
    Ok(())
}

/// Resolves once a termination signal arrives, after fanning the shutdown
/// out to the hub loop.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }

    if shutdown_tx.send(()).is_err() {
        error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
    }
}
