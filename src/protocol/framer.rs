//! Packet framer
//!
//! Turns the bytes accumulated in a connection's [`RingBuffer`] into
//! complete frames using the registry's opcode metadata:
//!
//! - fixed packets are exactly `length` bytes, opcode included
//! - variable packets carry their total length (opcode and length field
//!   included) as a big-endian u16 right after the opcode
//!
//! The framer never blocks. When a frame is incomplete it consumes nothing
//! and returns [`FrameOutcome::Incomplete`]; the read loop calls it again
//! after the next socket read.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{BufferError, ProtocolError};
use crate::metrics::SessionMetrics;
use crate::net::queue::InboundPayload;
use crate::net::ring_buffer::RingBuffer;
use crate::protocol::packet::{PacketSizing, VARIABLE_HEADER_SIZE};
use crate::protocol::registry::PacketRegistry;

/// Why a frame (or the whole pending buffer) was dropped
pub type DropReason = ProtocolError;

/// Result of one framing attempt
#[derive(Debug)]
pub enum FrameOutcome {
    /// A complete frame was consumed and decoded
    Ready {
        opcode: u8,
        length: usize,
        payload: InboundPayload,
    },
    /// Not enough bytes buffered yet; nothing was consumed
    Incomplete,
    /// Input was discarded; counts as a protocol violation
    Dropped(DropReason),
}

/// Opcode-driven framer shared by all connections
#[derive(Debug, Clone)]
pub struct PacketFramer {
    registry: Arc<PacketRegistry>,
    metrics: Arc<SessionMetrics>,
}

impl PacketFramer {
    /// Create a framer over a frozen registry
    pub fn new(registry: Arc<PacketRegistry>, metrics: Arc<SessionMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Get the registry this framer consults
    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    /// Attempt to take one frame from the front of `ring`.
    ///
    /// An error here means the ring buffer contract was broken, which is
    /// fatal to the connection.
    pub fn next_frame(&self, ring: &mut RingBuffer) -> Result<FrameOutcome, BufferError> {
        if ring.is_empty() {
            return Ok(FrameOutcome::Incomplete);
        }

        let opcode = ring.get(0)?;
        let registration = match self.registry.get(opcode) {
            Some(registration) => *registration,
            None => {
                // No length information for unknown types, so nothing after
                // this byte can be trusted
                let discarded = ring.len();
                ring.clear();
                self.metrics.unknown_opcode();
                debug!(
                    opcode = opcode,
                    discarded = discarded,
                    "Unknown opcode, discarding pending buffer"
                );
                return Ok(FrameOutcome::Dropped(ProtocolError::UnknownOpcode(opcode)));
            }
        };

        let frame_len = match registration.descriptor.sizing {
            PacketSizing::Fixed(length) => {
                if ring.len() < length {
                    return Ok(FrameOutcome::Incomplete);
                }
                length
            }
            PacketSizing::Variable => {
                if ring.len() < VARIABLE_HEADER_SIZE {
                    return Ok(FrameOutcome::Incomplete);
                }
                let declared = ring.get_u16(1)? as usize;
                if declared < VARIABLE_HEADER_SIZE || declared > ring.capacity() {
                    let expected = if declared < VARIABLE_HEADER_SIZE {
                        VARIABLE_HEADER_SIZE
                    } else {
                        ring.capacity()
                    };
                    // Cannot resynchronise on a nonsensical length
                    ring.clear();
                    self.metrics.invalid_length();
                    debug!(
                        opcode = opcode,
                        declared = declared,
                        "Invalid declared length, discarding pending buffer"
                    );
                    return Ok(FrameOutcome::Dropped(ProtocolError::InvalidLength {
                        opcode,
                        expected,
                        actual: declared,
                    }));
                }
                if ring.len() < declared {
                    return Ok(FrameOutcome::Incomplete);
                }
                declared
            }
        };

        let decoded = {
            let frame = ring.peek(frame_len)?;
            match registration.factory {
                None => Ok(InboundPayload::Raw(Bytes::copy_from_slice(&frame))),
                Some(make) => {
                    let mut packet = make();
                    packet.try_parse(&frame).map(|_| InboundPayload::Packet(packet))
                }
            }
        };
        ring.advance(frame_len)?;

        match decoded {
            Ok(payload) => {
                self.metrics.packet_parsed(frame_len);
                trace!(
                    opcode = opcode,
                    length = frame_len,
                    packet = registration.descriptor.type_name,
                    "Framed packet"
                );
                Ok(FrameOutcome::Ready {
                    opcode,
                    length: frame_len,
                    payload,
                })
            }
            Err(e) if e.is_length_error() => {
                self.metrics.invalid_length();
                debug!(opcode = opcode, error = %e, "Dropping frame with invalid length");
                Ok(FrameOutcome::Dropped(ProtocolError::InvalidLength {
                    opcode,
                    expected: registration.descriptor.sizing.fixed_size().unwrap_or(frame_len),
                    actual: frame_len,
                }))
            }
            Err(e) => {
                self.metrics.parse_failure();
                debug!(opcode = opcode, error = %e, "Dropping frame that failed to parse");
                Ok(FrameOutcome::Dropped(ProtocolError::ParseFailure {
                    opcode,
                    reason: e.to_string(),
                }))
            }
        }
    }
}
