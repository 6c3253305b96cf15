//! Connection handler module
//!
//! Handles the lifecycle of client connections including:
//! - Session registration and the `ClientConnected` notification
//! - The read loop: raw notification, inbound middleware, ring buffer, framing
//! - Protocol violation accounting and forced disconnects
//! - Teardown: drain queued writes, close the socket, `ClientDisconnected`

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::error::{NetworkError, PipelineError, ProtocolError, Result};
use crate::net::events::ConnectionEvent;
use crate::net::ring_buffer::RingBuffer;
use crate::net::session::{BoxedWriter, Session, SessionState};
use crate::protocol::framer::{FrameOutcome, PacketFramer};
use crate::state::GatewayState;

/// Connection handler for processing client connections
#[derive(Clone)]
pub struct ConnectionHandler {
    /// Shared gateway state
    state: Arc<GatewayState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    /// Handle a TCP connection
    pub async fn handle_tcp(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling TCP connection");

        // Set TCP options
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        self.handle_connection(reader, Box::new(writer), addr).await;
        Ok(())
    }

    /// Run a connection to completion over any byte stream
    pub async fn handle_connection<R>(&self, reader: R, writer: BoxedWriter, addr: SocketAddr)
    where
        R: AsyncRead + Unpin,
    {
        let session = self.state.session_manager.create_session(
            addr,
            writer,
            self.state.pipeline.instantiate(),
            &self.state.shutdown,
        );

        session.mark_connected();
        info!(session_id = session.id, address = %addr, "Client connected");
        self.state
            .events
            .publish(ConnectionEvent::ClientConnected(session.clone()));

        let reason = match self.process_connection(reader, &session).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(session_id = session.id, error = %e, "Connection fault");
                self.state.events.exception(e, Some(session.clone()));
                "fault"
            }
        };

        self.teardown(&session, reason).await;
    }

    /// Read loop. Returns the disconnect reason on an orderly exit.
    async fn process_connection<R>(
        &self,
        mut reader: R,
        session: &Arc<Session>,
    ) -> Result<&'static str>
    where
        R: AsyncRead + Unpin,
    {
        let config = &self.state.config;
        let mut ring = RingBuffer::new(config.ring_buffer_capacity);
        let framer = PacketFramer::new(self.state.registry.clone(), self.state.metrics.clone());
        let mut chunk = vec![0u8; config.read_chunk_size];
        let cancel = session.cancel_token().clone();

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok("cancelled"),
                read = reader.read(&mut chunk) => read,
            };

            let n = read.map_err(|e| NetworkError::ReadError(e.to_string()))?;
            if n == 0 {
                debug!(session_id = session.id, "Connection closed by peer");
                return Ok("closed by peer");
            }

            session.touch();
            let raw = Bytes::copy_from_slice(&chunk[..n]);
            trace!(session_id = session.id, bytes = n, "Data received");
            self.state
                .events
                .publish(ConnectionEvent::DataReceivedRaw(session.clone(), raw.clone()));

            let decoded = match session.process_inbound(raw) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => {
                    if session.violations() > session.max_violations() {
                        return Err(ProtocolError::ProtocolViolationLimit {
                            violations: session.violations(),
                            max: session.max_violations(),
                        }
                        .into());
                    }
                    if !session.is_active() {
                        return Ok("disconnect requested");
                    }
                    continue;
                }
                Err(PipelineError::Cancelled) => return Ok("cancelled"),
                Err(e) => return Err(e.into()),
            };

            self.ingest(&framer, &mut ring, session, &decoded)?;

            if !session.is_active() {
                return Ok("disconnect requested");
            }
        }
    }

    /// Append decoded bytes to the ring buffer, framing as space runs out
    fn ingest(
        &self,
        framer: &PacketFramer,
        ring: &mut RingBuffer,
        session: &Arc<Session>,
        data: &[u8],
    ) -> Result<()> {
        let mut rest = data;
        loop {
            let accepted = ring.write(rest);
            rest = &rest[accepted..];

            self.drain_frames(framer, ring, session)?;

            if rest.is_empty() || !session.is_active() {
                return Ok(());
            }

            // A full buffer that holds no complete frame cannot make progress
            if accepted == 0 && ring.is_full() {
                self.state.metrics.pending_buffer_overflow();
                return Err(NetworkError::PendingBufferOverflow {
                    pending: ring.len(),
                    incoming: rest.len(),
                    capacity: ring.capacity(),
                }
                .into());
            }
        }
    }

    /// Publish every complete frame currently buffered
    fn drain_frames(
        &self,
        framer: &PacketFramer,
        ring: &mut RingBuffer,
        session: &Arc<Session>,
    ) -> Result<()> {
        loop {
            if session.cancel_token().is_cancelled() {
                return Ok(());
            }

            match framer.next_frame(ring)? {
                FrameOutcome::Incomplete => return Ok(()),
                FrameOutcome::Ready {
                    opcode,
                    length,
                    payload,
                } => {
                    trace!(
                        session_id = session.id,
                        opcode = format_args!("0x{:02X}", opcode),
                        length = length,
                        "Frame ready"
                    );
                    session.packet_received();
                    if !self.state.inbound.publish(session.clone(), opcode, payload) {
                        debug!(session_id = session.id, "Inbound queue closed, frame discarded");
                    }
                }
                FrameOutcome::Dropped(reason) => {
                    let over_limit = session.record_violation();
                    debug!(
                        session_id = session.id,
                        reason = %reason,
                        violations = session.violations(),
                        "Frame dropped"
                    );
                    if over_limit {
                        return Err(ProtocolError::ProtocolViolationLimit {
                            violations: session.violations(),
                            max: session.max_violations(),
                        }
                        .into());
                    }
                }
            }
        }
    }

    /// Tear a session down. Safe to call more than once or concurrently;
    /// only the first caller to finish emits `ClientDisconnected`.
    pub async fn teardown(&self, session: &Arc<Session>, reason: &str) {
        session.begin_disconnect(reason);
        if session.state() != SessionState::Disconnecting {
            return;
        }

        let timeout = self.state.config.teardown_timeout();
        if !session.wait_drained(timeout).await {
            warn!(
                session_id = session.id,
                pending = session.pending_outbound(),
                "Teardown timed out waiting for queued writes"
            );
        }

        if !session.finish_disconnect() {
            return;
        }

        session.close_writer().await;
        self.state.session_manager.remove(session.id);

        info!(
            session_id = session.id,
            address = %session.address,
            reason = reason,
            "Client disconnected"
        );
        self.state
            .events
            .publish(ConnectionEvent::ClientDisconnected(session.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::ServerConfig;
    use crate::error::GatewayError;
    use crate::net::sender::PacketSender;
    use crate::pipeline::{Middleware, PipelineTemplate, StageOutcome};
    use crate::protocol::packet::PacketSizing;
    use crate::protocol::packets::{default_registry, PingPacket};
    use crate::protocol::registry::PacketRegistry;
    use crate::state::shared_for_tests;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_frames_published_and_disconnect_on_eof() {
        let (state, mut receivers) =
            shared_for_tests(ServerConfig::default(), default_registry().unwrap());
        let handler = ConnectionHandler::new(state.clone());
        let mut events = state.events.subscribe();

        let (mut client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(async move {
            handler
                .handle_connection(server_read, Box::new(server_write), addr())
                .await
        });

        client.write_all(&[0x73, 0x01, 0x73]).await.unwrap();
        client.write_all(&[0x02]).await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);
        task.await.unwrap();

        let batch = receivers.inbound.drain();
        let sequences: Vec<u8> = batch
            .iter()
            .map(|e| e.payload.packet::<PingPacket>().unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(state.session_manager.count(), 0);

        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::ClientConnected(_)
        ));
        let mut saw_disconnect = false;
        while let Ok(event) = events.try_recv() {
            if let ConnectionEvent::ClientDisconnected(session) = event {
                assert_eq!(session.state(), SessionState::Disconnected);
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
    }

    #[tokio::test]
    async fn test_scripted_reads_reassemble_frames() {
        let (state, mut receivers) =
            shared_for_tests(ServerConfig::default(), default_registry().unwrap());
        let handler = ConnectionHandler::new(state.clone());

        // Frames split across reads, then EOF
        let reader = Builder::new()
            .read(&[0x73])
            .read(&[0x05, 0x73])
            .read(&[0x06])
            .build();
        handler
            .handle_connection(reader, Box::new(tokio::io::sink()), addr())
            .await;

        let sequences: Vec<u8> = receivers
            .inbound
            .drain()
            .iter()
            .map(|e| e.payload.packet::<PingPacket>().unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![5, 6]);
        assert_eq!(state.session_manager.count(), 0);
    }

    #[tokio::test]
    async fn test_read_error_raises_and_tears_down() {
        let (state, mut receivers) =
            shared_for_tests(ServerConfig::default(), default_registry().unwrap());
        let handler = ConnectionHandler::new(state.clone());
        let mut events = state.events.subscribe();

        let reader = Builder::new()
            .read(&[0x73, 0x01])
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        handler
            .handle_connection(reader, Box::new(tokio::io::sink()), addr())
            .await;

        assert_eq!(receivers.inbound.drain().len(), 1);
        assert_eq!(state.session_manager.count(), 0);

        let mut fault = false;
        let mut disconnected = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ConnectionEvent::ExceptionRaised { error, session } => {
                    assert!(session.is_some());
                    assert!(matches!(
                        error.as_ref(),
                        GatewayError::Network(NetworkError::ReadError(_))
                    ));
                    fault = true;
                }
                ConnectionEvent::ClientDisconnected(_) => disconnected = true,
                _ => {}
            }
        }
        assert!(fault);
        assert!(disconnected);
    }

    struct Reject;

    impl Middleware for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn process_inbound(
            &mut self,
            _session: &Session,
            _data: Bytes,
        ) -> std::result::Result<StageOutcome, PipelineError> {
            Ok(StageOutcome::Halt("rejected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_pipeline_halt_over_limit_raises() {
        let config = ServerConfig {
            max_protocol_violations: 1,
            ..ServerConfig::default()
        };
        let pipeline = PipelineTemplate::new()
            .with_stage("reject", || Box::new(Reject) as Box<dyn Middleware>);
        let (state, _receivers) =
            GatewayState::with_pipeline(config, default_registry().unwrap(), pipeline);
        let state = Arc::new(state);
        let handler = ConnectionHandler::new(state.clone());
        let mut events = state.events.subscribe();

        // The second halt crosses the limit before the script runs out
        let reader = Builder::new().read(&[0x73, 0x01]).read(&[0x73, 0x02]).build();
        handler
            .handle_connection(reader, Box::new(tokio::io::sink()), addr())
            .await;

        assert_eq!(state.session_manager.count(), 0);
        let mut limit = None;
        while let Ok(event) = events.try_recv() {
            if let ConnectionEvent::ExceptionRaised { error, .. } = event {
                if let GatewayError::Protocol(ProtocolError::ProtocolViolationLimit {
                    violations,
                    max,
                }) = error.as_ref()
                {
                    limit = Some((*violations, *max));
                }
            }
        }
        assert_eq!(limit, Some((2, 1)));
    }

    #[tokio::test]
    async fn test_teardown_not_blocked_by_stalled_write() {
        let mut config = ServerConfig {
            teardown_timeout_ms: 100,
            ..ServerConfig::default()
        };
        config.compression.enabled = false;
        let (state, receivers) = shared_for_tests(config, default_registry().unwrap());
        let handler = ConnectionHandler::new(state.clone());
        let mut events = state.events.subscribe();

        // The peer never reads, so the sender stalls once the pipe is full
        let (_client, server) = tokio::io::duplex(4);
        let session = state.session_manager.create_session(
            addr(),
            Box::new(server),
            state.pipeline.instantiate(),
            &state.shutdown,
        );
        session.mark_connected();
        for seq in 0..10u8 {
            state.outbound.enqueue(session.id, Box::new(PingPacket::new(seq)));
        }
        let sender = tokio::spawn(PacketSender::new(state.clone(), receivers.outbound).run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.pending_outbound() > 0);

        tokio::time::timeout(Duration::from_secs(2), handler.teardown(&session, "kick"))
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(state.session_manager.get(session.id).is_none());
        let mut disconnected = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConnectionEvent::ClientDisconnected(_)) {
                disconnected = true;
            }
        }
        assert!(disconnected);

        state.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), sender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_overflow_tears_down() {
        let config = ServerConfig {
            ring_buffer_capacity: 16,
            ..ServerConfig::default()
        };
        // A fixed frame larger than the buffer can never complete
        let mut builder = PacketRegistry::builder();
        builder.register_raw(0x10, PacketSizing::Fixed(32)).unwrap();
        let (state, _receivers) = shared_for_tests(config, builder.build());
        let handler = ConnectionHandler::new(state.clone());

        let (mut client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(async move {
            handler
                .handle_connection(server_read, Box::new(server_write), addr())
                .await
        });

        let mut data = vec![0x10];
        data.extend_from_slice(&[0u8; 39]);
        client.write_all(&data).await.unwrap();
        task.await.unwrap();

        assert_eq!(state.metrics.snapshot().pending_buffer_overflows, 1);
        assert_eq!(state.session_manager.count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (state, _receivers) =
            shared_for_tests(ServerConfig::default(), default_registry().unwrap());
        let handler = ConnectionHandler::new(state.clone());
        let mut events = state.events.subscribe();

        let session = state.session_manager.create_session(
            addr(),
            Box::new(tokio::io::sink()),
            state.pipeline.instantiate(),
            &state.shutdown,
        );
        session.mark_connected();

        tokio::join!(
            handler.teardown(&session, "first"),
            handler.teardown(&session, "second")
        );
        handler.teardown(&session, "third").await;

        assert_eq!(session.state(), SessionState::Disconnected);
        let mut disconnects = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ConnectionEvent::ClientDisconnected(_)) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
    }
}
