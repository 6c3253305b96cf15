//! Networking module
//!
//! This module handles all network-related functionality for the gateway:
//! - Per-connection receive buffering and big-endian field access
//! - Session management and lifecycle notifications
//! - Inbound/outbound queues between the sockets and the game loop
//! - The read loop, the outbound sender and the accept loop

pub mod buffer;
pub mod events;
pub mod handler;
pub mod queue;
pub mod ring_buffer;
pub mod sender;
pub mod server;
pub mod session;

pub use events::{ConnectionEvent, EventBus};
pub use handler::ConnectionHandler;
pub use queue::{InboundEnvelope, InboundPayload, InboundQueue, OutboundEnvelope, OutboundQueue};
pub use ring_buffer::RingBuffer;
pub use sender::PacketSender;
pub use session::{Session, SessionId, SessionManager, SessionState};
