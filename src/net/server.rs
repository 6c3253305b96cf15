//! TCP accept loop

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{GatewayError, NetworkError};
use crate::net::handler::ConnectionHandler;
use crate::state::GatewayState;

/// Accept connections until the root token is cancelled, then wait for
/// every connection task to finish its teardown.
pub async fn accept_connections(listener: TcpListener, state: Arc<GatewayState>) {
    let shutdown = state.shutdown.clone();
    let handler = ConnectionHandler::new(state.clone());
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Connection acceptor shutting down");
                break;
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!(address = %addr, "New connection");
                        let handler = handler.clone();
                        connections.spawn(async move {
                            if let Err(e) = handler.handle_tcp(stream, addr).await {
                                warn!(address = %addr, error = %e, "Connection setup failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        state.events.exception(
                            GatewayError::Network(NetworkError::ReadError(e.to_string())),
                            None,
                        );
                    }
                }
            }
        }
    }

    state.session_manager.disconnect_all("server shutdown");
    while connections.join_next().await.is_some() {}
    info!("All connections closed");
}
