//! Protocol module
//!
//! This module contains the wire-level packet model for the gateway:
//! - Packet trait and framing rules
//! - Opcode registry (built once at startup)
//! - Framer that cuts packets out of a connection's receive buffer
//! - The built-in packet set

pub mod framer;
pub mod packet;
pub mod packets;
pub mod registry;

pub use framer::{DropReason, FrameOutcome, PacketFramer};
pub use packet::{Packet, PacketDecodeError, PacketEncodeError, PacketMetadata, PacketSizing};
pub use registry::{PacketDescriptor, PacketRegistry, PacketRegistryBuilder};
