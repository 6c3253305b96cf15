//! Rustscape Gateway
//!
//! Accepts game client connections, frames their packets for the game loop
//! and writes the game loop's replies back out.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rustscape_gateway::config::ServerConfig;
use rustscape_gateway::net::queue::InboundReceiver;
use rustscape_gateway::net::sender::PacketSender;
use rustscape_gateway::net::server::accept_connections;
use rustscape_gateway::protocol::packets::{default_registry, PingPacket};
use rustscape_gateway::{GatewayState, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; logging settings come from it
    let config = ServerConfig::load().await?;

    // Initialize logging
    init_logging(&config);

    info!("Rustscape Gateway v{}", VERSION);
    if config.config_path.exists() {
        info!(
            "Configuration loaded from: {}",
            config.config_path.display()
        );
    } else {
        warn!(
            "Config file not found at {}, using defaults",
            config.config_path.display()
        );
    }

    let registry = default_registry()?;
    let (state, receivers) = GatewayState::new(config.clone(), registry);
    let state = Arc::new(state);

    // Start TCP listener
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on: {}", addr);

    let sender_handle = tokio::spawn(PacketSender::new(state.clone(), receivers.outbound).run());

    let accept_state = state.clone();
    let accept_handle = tokio::spawn(accept_connections(listener, accept_state));

    let game_state = state.clone();
    let game_handle = tokio::spawn(run_game_loop(game_state, receivers.inbound));

    if config.metrics_interval_secs > 0 {
        let metrics_state = state.clone();
        tokio::spawn(log_metrics(
            metrics_state,
            Duration::from_secs(config.metrics_interval_secs),
        ));
    }

    info!("Gateway startup complete!");

    // Wait for shutdown signal
    wait_for_shutdown(state.shutdown.clone()).await;

    info!("Shutting down gateway...");

    // Connections tear down first so their queued replies can drain
    let _ = accept_handle.await;
    let _ = game_handle.await;
    let _ = sender_handle.await;

    info!("Gateway shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter()));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Demo game loop: drain inbound packets every tick and echo pings
async fn run_game_loop(state: Arc<GatewayState>, mut inbound: InboundReceiver) {
    let mut tick = tokio::time::interval(state.config.tick_rate());
    let shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }

        for envelope in inbound.drain() {
            trace!(
                session_id = envelope.session.id,
                opcode = envelope.opcode,
                queued_for = ?envelope.timestamp.elapsed(),
                "Inbound packet"
            );
            if let Some(ping) = envelope.payload.packet::<PingPacket>() {
                state
                    .outbound
                    .enqueue(envelope.session.id, Box::new(PingPacket::new(ping.sequence)));
            }
        }
    }

    debug!("Game loop stopped");
}

/// Periodically log a metrics snapshot
async fn log_metrics(state: Arc<GatewayState>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    let shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let snapshot = state.metrics.snapshot();
                match serde_json::to_string(&snapshot) {
                    Ok(json) => debug!(
                        sessions = state.session_manager.count(),
                        metrics = %json,
                        "Metrics snapshot"
                    ),
                    Err(e) => debug!(error = %e, "Failed to serialize metrics snapshot"),
                }
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    shutdown.cancel();
}
