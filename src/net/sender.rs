//! Outbound sender
//!
//! A single task drains the outbound queue in FIFO order, so per-session
//! ordering is preserved. A slow write for one session delays every
//! session behind it.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::net::buffer::PacketWriter;
use crate::net::queue::{OutboundEnvelope, OutboundReceiver};
use crate::net::session::Session;
use crate::state::GatewayState;

/// Drains the outbound queue onto client sockets
pub struct PacketSender {
    state: Arc<GatewayState>,
    queue: OutboundReceiver,
}

impl PacketSender {
    /// Create a sender for the given queue
    pub fn new(state: Arc<GatewayState>, queue: OutboundReceiver) -> Self {
        Self { state, queue }
    }

    /// Run until shutdown or until every producer is gone.
    ///
    /// On shutdown, envelopes already queued are still delivered.
    pub async fn run(mut self) {
        let shutdown = self.state.shutdown.clone();
        info!("Outbound sender started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    while let Some(envelope) = self.queue.try_dequeue() {
                        self.send(envelope).await;
                    }
                    break;
                }
                envelope = self.queue.recv() => match envelope {
                    Some(envelope) => self.send(envelope).await,
                    None => break,
                },
            }
        }

        info!("Outbound sender stopped");
    }

    /// Deliver one envelope. Failures tear the session down; they never
    /// stop the sender.
    pub async fn send(&self, envelope: OutboundEnvelope) {
        let Some(session) = self.state.session_manager.get(envelope.session_id) else {
            trace!(
                session_id = envelope.session_id,
                opcode = envelope.packet.opcode(),
                "Session gone, dropping outbound packet"
            );
            return;
        };

        let result = self.deliver(&session, &envelope).await;
        session.outbound_completed();

        if let Err(e) = result {
            warn!(session_id = session.id, error = %e, "Outbound write failed");
            session.begin_disconnect("outbound write failed");
            self.state.events.exception(e, Some(session));
        }
    }

    async fn deliver(&self, session: &Session, envelope: &OutboundEnvelope) -> Result<()> {
        if !session.state().accepts_outbound() {
            trace!(
                session_id = session.id,
                state = %session.state(),
                "Session not writable, dropping outbound packet"
            );
            return Ok(());
        }

        let mut writer = PacketWriter::new();
        if let Err(e) = envelope.packet.write(&mut writer) {
            warn!(
                session_id = session.id,
                opcode = envelope.packet.opcode(),
                error = %e,
                "Outbound packet could not be encoded, dropping"
            );
            return Ok(());
        }

        let wire = match session.process_outbound(writer.freeze())? {
            Some(wire) => wire,
            None => {
                debug!(
                    session_id = session.id,
                    opcode = envelope.packet.opcode(),
                    "Outbound packet dropped by pipeline"
                );
                return Ok(());
            }
        };

        session.write_bytes(&wire).await?;
        trace!(
            session_id = session.id,
            opcode = envelope.packet.opcode(),
            bytes = wire.len(),
            "Packet sent"
        );
        Ok(())
    }
}
