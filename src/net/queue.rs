//! Inbound and outbound packet queues
//!
//! Both queues are unbounded multi-producer channels with a single
//! consumer: the game loop drains the inbound side, the sender task drains
//! the outbound side.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::net::session::{Session, SessionId, SessionManager};
use crate::protocol::packet::Packet;

/// Body of an inbound envelope
#[derive(Debug)]
pub enum InboundPayload {
    /// Parsed packet instance
    Packet(Box<dyn Packet>),
    /// Complete frame bytes for opcodes registered without a packet type
    Raw(Bytes),
}

impl InboundPayload {
    /// Downcast a parsed packet to a concrete type
    pub fn packet<T: Packet>(&self) -> Option<&T> {
        match self {
            InboundPayload::Packet(packet) => packet.downcast_ref::<T>(),
            InboundPayload::Raw(_) => None,
        }
    }

    /// Raw frame bytes, if this was a raw registration
    pub fn raw(&self) -> Option<&Bytes> {
        match self {
            InboundPayload::Raw(bytes) => Some(bytes),
            InboundPayload::Packet(_) => None,
        }
    }
}

/// A framed packet on its way to the game loop
#[derive(Debug)]
pub struct InboundEnvelope {
    pub session: Arc<Session>,
    pub opcode: u8,
    pub payload: InboundPayload,
    pub timestamp: Instant,
}

/// A packet on its way to a client
#[derive(Debug)]
pub struct OutboundEnvelope {
    pub session_id: SessionId,
    pub packet: Box<dyn Packet>,
    pub timestamp: Instant,
}

/// Producer side of the inbound queue (one clone per connection)
#[derive(Debug, Clone)]
pub struct InboundQueue {
    tx: mpsc::UnboundedSender<InboundEnvelope>,
}

/// Consumer side of the inbound queue, owned by the game loop
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::UnboundedReceiver<InboundEnvelope>,
}

impl InboundQueue {
    /// Create a connected producer/consumer pair
    pub fn channel() -> (Self, InboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, InboundReceiver { rx })
    }

    /// Publish a framed packet. Returns `false` if the game loop is gone.
    pub fn publish(&self, session: Arc<Session>, opcode: u8, payload: InboundPayload) -> bool {
        let envelope = InboundEnvelope {
            session,
            opcode,
            payload,
            timestamp: Instant::now(),
        };
        self.tx.send(envelope).is_ok()
    }
}

impl InboundReceiver {
    /// Take the next envelope without waiting
    pub fn try_recv(&mut self) -> Option<InboundEnvelope> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next envelope; `None` once every producer is dropped
    pub async fn recv(&mut self) -> Option<InboundEnvelope> {
        self.rx.recv().await
    }

    /// Take everything currently queued, in arrival order
    pub fn drain(&mut self) -> Vec<InboundEnvelope> {
        let mut batch = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            batch.push(envelope);
        }
        batch
    }
}

/// Producer side of the outbound queue
///
/// Enqueueing counts the envelope against the session's pending writes so
/// teardown can wait for it to drain.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundEnvelope>,
    sessions: Arc<SessionManager>,
}

/// Consumer side of the outbound queue, owned by the sender task
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<OutboundEnvelope>,
}

impl OutboundQueue {
    /// Create a connected producer/consumer pair
    pub fn channel(sessions: Arc<SessionManager>) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, sessions }, OutboundReceiver { rx })
    }

    /// Queue a packet for a session. Returns `false` if the sender is gone.
    ///
    /// Unknown session ids are still queued; the sender drops them.
    pub fn enqueue(&self, session_id: SessionId, packet: Box<dyn Packet>) -> bool {
        trace!(session_id, opcode = packet.opcode(), "Outbound packet queued");
        let session = self.sessions.get(session_id);
        if let Some(session) = &session {
            session.outbound_queued();
        }

        let envelope = OutboundEnvelope {
            session_id,
            packet,
            timestamp: Instant::now(),
        };
        match self.tx.send(envelope) {
            Ok(()) => true,
            Err(_) => {
                if let Some(session) = session {
                    session.outbound_completed();
                }
                false
            }
        }
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl OutboundReceiver {
    /// Take the next envelope without waiting
    pub fn try_dequeue(&mut self) -> Option<OutboundEnvelope> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next envelope; `None` once every producer is dropped
    pub async fn recv(&mut self) -> Option<OutboundEnvelope> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SessionMetrics;
    use crate::net::session::SessionOptions;
    use crate::pipeline::PipelineTemplate;
    use crate::protocol::packets::PingPacket;
    use tokio_util::sync::CancellationToken;

    fn sessions() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Arc::new(SessionMetrics::new()),
            SessionOptions::default(),
        ))
    }

    #[test]
    fn test_outbound_fifo() {
        let (queue, mut rx) = OutboundQueue::channel(sessions());
        for seq in 0..5u8 {
            assert!(queue.enqueue(7, Box::new(PingPacket::new(seq))));
        }

        for seq in 0..5u8 {
            let envelope = rx.try_dequeue().unwrap();
            assert_eq!(envelope.session_id, 7);
            let ping = envelope.packet.downcast_ref::<PingPacket>().unwrap();
            assert_eq!(ping.sequence, seq);
        }
        assert!(rx.try_dequeue().is_none());
    }

    #[test]
    fn test_enqueue_after_receiver_dropped() {
        let sessions = sessions();
        let session = sessions.create_session(
            "127.0.0.1:1".parse().unwrap(),
            Box::new(tokio::io::sink()),
            PipelineTemplate::new().instantiate(),
            &CancellationToken::new(),
        );
        let (queue, rx) = OutboundQueue::channel(sessions);
        drop(rx);
        assert!(!queue.enqueue(session.id, Box::new(PingPacket::new(0))));
        assert_eq!(session.pending_outbound(), 0);
    }

    #[test]
    fn test_enqueue_counts_pending() {
        let sessions = sessions();
        let session = sessions.create_session(
            "127.0.0.1:1".parse().unwrap(),
            Box::new(tokio::io::sink()),
            PipelineTemplate::new().instantiate(),
            &CancellationToken::new(),
        );
        let (queue, _rx) = OutboundQueue::channel(sessions);
        queue.enqueue(session.id, Box::new(PingPacket::new(0)));
        queue.enqueue(session.id, Box::new(PingPacket::new(1)));
        assert_eq!(session.pending_outbound(), 2);
    }

    #[test]
    fn test_payload_accessors() {
        let packet = InboundPayload::Packet(Box::new(PingPacket::new(3)));
        assert_eq!(packet.packet::<PingPacket>().unwrap().sequence, 3);
        assert!(packet.raw().is_none());

        let raw = InboundPayload::Raw(Bytes::from_static(&[0xBF, 0x00, 0x03]));
        assert!(raw.packet::<PingPacket>().is_none());
        assert_eq!(raw.raw().unwrap().len(), 3);
    }
}
