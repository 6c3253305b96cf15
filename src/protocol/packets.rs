//! Packet definitions module
//!
//! The built-in packet types and the startup registration table. Field
//! semantics are kept minimal; game systems interpret them.

use std::any::Any;

use crate::error::RegistryError;
use crate::net::buffer::{PacketReader, PacketWriter};
use crate::protocol::packet::{Packet, PacketDecodeError, PacketMetadata, PacketSizing};
use crate::protocol::registry::{PacketRegistry, PacketRegistryBuilder};

/// Longest speech text accepted from a client, in bytes
pub const MAX_SPEECH_LENGTH: usize = 512;

// ============ Ping (0x73) ============

/// Keep-alive ping, echoed back by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingPacket {
    pub sequence: u8,
}

impl PingPacket {
    pub fn new(sequence: u8) -> Self {
        Self { sequence }
    }
}

impl Packet for PingPacket {
    fn opcode(&self) -> u8 {
        Self::OPCODE
    }

    fn sizing(&self) -> PacketSizing {
        Self::SIZING
    }

    fn parse_payload(&mut self, reader: &mut PacketReader<'_>) -> Result<(), PacketDecodeError> {
        self.sequence = reader.read_u8()?;
        Ok(())
    }

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.sequence);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PacketMetadata for PingPacket {
    const OPCODE: u8 = 0x73;
    const SIZING: PacketSizing = PacketSizing::Fixed(2);
}

// ============ Move request (0x02) ============

/// Single-step movement request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveRequestPacket {
    /// Direction (low 3 bits) with the run flag in the high bit
    pub direction: u8,
    pub sequence: u8,
    pub fast_walk_key: u32,
}

impl MoveRequestPacket {
    /// Whether the run flag is set
    pub fn running(&self) -> bool {
        self.direction & 0x80 != 0
    }
}

impl Packet for MoveRequestPacket {
    fn opcode(&self) -> u8 {
        Self::OPCODE
    }

    fn sizing(&self) -> PacketSizing {
        Self::SIZING
    }

    fn parse_payload(&mut self, reader: &mut PacketReader<'_>) -> Result<(), PacketDecodeError> {
        let direction = reader.read_u8()?;
        if direction & 0x7F > 7 {
            return Err(PacketDecodeError::InvalidValue {
                field: "direction".to_string(),
                value: direction.to_string(),
            });
        }
        self.direction = direction;
        self.sequence = reader.read_u8()?;
        self.fast_walk_key = reader.read_u32()?;
        Ok(())
    }

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.direction);
        writer.write_u8(self.sequence);
        writer.write_u32(self.fast_walk_key);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PacketMetadata for MoveRequestPacket {
    const OPCODE: u8 = 0x02;
    const SIZING: PacketSizing = PacketSizing::Fixed(7);
}

// ============ Speech (0x03) ============

/// Plain-text speech request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechPacket {
    pub kind: u8,
    pub hue: u16,
    pub font: u16,
    pub text: String,
}

impl Packet for SpeechPacket {
    fn opcode(&self) -> u8 {
        Self::OPCODE
    }

    fn sizing(&self) -> PacketSizing {
        Self::SIZING
    }

    fn parse_payload(&mut self, reader: &mut PacketReader<'_>) -> Result<(), PacketDecodeError> {
        self.kind = reader.read_u8()?;
        self.hue = reader.read_u16()?;
        self.font = reader.read_u16()?;
        if reader.remaining() > MAX_SPEECH_LENGTH + 1 {
            return Err(PacketDecodeError::Malformed(format!(
                "speech text too long: {} bytes",
                reader.remaining()
            )));
        }
        self.text = reader.read_string()?;
        Ok(())
    }

    fn write_payload(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.kind);
        writer.write_u16(self.hue);
        writer.write_u16(self.font);
        writer.write_string(&self.text);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PacketMetadata for SpeechPacket {
    const OPCODE: u8 = 0x03;
    const SIZING: PacketSizing = PacketSizing::Variable;
}

// ============ Registration table ============

/// Register the built-in packet set
pub fn register_defaults(
    builder: &mut PacketRegistryBuilder,
) -> Result<(), RegistryError> {
    builder
        .register_from_declared_metadata::<PingPacket>()?
        .register_from_declared_metadata::<MoveRequestPacket>()?
        .register_from_declared_metadata::<SpeechPacket>()?;
    Ok(())
}

/// Build a registry holding only the built-in packet set
pub fn default_registry() -> Result<PacketRegistry, RegistryError> {
    let mut builder = PacketRegistry::builder();
    register_defaults(&mut builder)?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ping_wire_format() {
        let mut writer = PacketWriter::new();
        PingPacket::new(9).write(&mut writer).unwrap();
        assert_eq!(writer.as_bytes(), &[0x73, 9]);

        let mut ping = PingPacket::default();
        ping.try_parse(&[0x73, 9]).unwrap();
        assert_eq!(ping, PingPacket::new(9));
    }

    #[test]
    fn test_move_request_decode() {
        let mut packet = MoveRequestPacket::default();
        packet
            .try_parse(&[0x02, 0x83, 0x05, 0xDE, 0xAD, 0xBE, 0xEF])
            .unwrap();
        assert_eq!(packet.direction, 0x83);
        assert!(packet.running());
        assert_eq!(packet.sequence, 5);
        assert_eq!(packet.fast_walk_key, 0xDEADBEEF);
    }

    #[test]
    fn test_move_request_rejects_bad_direction() {
        let mut packet = MoveRequestPacket::default();
        let err = packet
            .try_parse(&[0x02, 0x09, 0x00, 0, 0, 0, 0])
            .unwrap_err();
        assert!(matches!(err, PacketDecodeError::InvalidValue { .. }));
    }

    #[test]
    fn test_speech_round_trip() {
        let speech = SpeechPacket {
            kind: 0,
            hue: 0x03B2,
            font: 3,
            text: "hail".to_string(),
        };
        let mut writer = PacketWriter::new();
        speech.write(&mut writer).unwrap();
        // opcode + length + kind + hue + font + "hail\0"
        assert_eq!(writer.len(), 3 + 1 + 2 + 2 + 5);
        assert_eq!(&writer.as_bytes()[..3], &[0x03, 0x00, 13]);

        let mut parsed = SpeechPacket::default();
        parsed.try_parse(writer.as_bytes()).unwrap();
        assert_eq!(parsed, speech);
    }

    #[test]
    fn test_default_registry() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.is_registered(PingPacket::OPCODE));
        assert!(registry.is_registered(MoveRequestPacket::OPCODE));
        assert!(registry.is_registered(SpeechPacket::OPCODE));
    }
}
