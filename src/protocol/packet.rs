//! Packet abstraction
//!
//! Defines how the core sees a packet: an opcode, a framing rule and a pair
//! of payload codecs. Everything else about a packet's fields belongs to the
//! packet type itself.

use std::any::Any;
use std::fmt;

use crate::net::buffer::{PacketReader, PacketWriter};

/// Wire-level length sentinel for variable-size packets
pub const VARIABLE_LENGTH: i32 = -1;

/// Size of the opcode byte plus the 2-byte length field of variable packets
pub const VARIABLE_HEADER_SIZE: usize = 3;

/// Framing rule for an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketSizing {
    /// Total wire length (opcode included) is known from the opcode alone
    Fixed(usize),
    /// Total wire length is carried in a big-endian u16 after the opcode
    Variable,
}

impl PacketSizing {
    /// Get the fixed size value, if applicable
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            PacketSizing::Fixed(size) => Some(*size),
            PacketSizing::Variable => None,
        }
    }

    /// Check if this is a variable length packet
    pub fn is_variable(&self) -> bool {
        matches!(self, PacketSizing::Variable)
    }

    /// Check if this is a fixed length packet
    pub fn is_fixed(&self) -> bool {
        matches!(self, PacketSizing::Fixed(_))
    }

    /// Length as carried in descriptors: the fixed size, or `-1` for variable
    pub fn length(&self) -> i32 {
        match self {
            PacketSizing::Fixed(size) => *size as i32,
            PacketSizing::Variable => VARIABLE_LENGTH,
        }
    }
}

/// Packet decode error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketDecodeError {
    /// Frame opcode does not match the packet type
    OpcodeMismatch { expected: u8, actual: u8 },
    /// Frame length disagrees with the fixed size or the declared length
    LengthMismatch { expected: usize, actual: usize },
    /// Not enough data in the frame for the next field
    InsufficientData { expected: usize, actual: usize },
    /// Invalid field value
    InvalidValue { field: String, value: String },
    /// Malformed packet structure
    Malformed(String),
}

impl PacketDecodeError {
    /// Whether this failure is a framing length problem rather than a
    /// payload-level one
    pub fn is_length_error(&self) -> bool {
        matches!(self, PacketDecodeError::LengthMismatch { .. })
    }
}

impl fmt::Display for PacketDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDecodeError::OpcodeMismatch { expected, actual } => {
                write!(
                    f,
                    "Opcode mismatch: expected 0x{:02X}, got 0x{:02X}",
                    expected, actual
                )
            }
            PacketDecodeError::LengthMismatch { expected, actual } => {
                write!(
                    f,
                    "Length mismatch: expected {} bytes, got {}",
                    expected, actual
                )
            }
            PacketDecodeError::InsufficientData { expected, actual } => {
                write!(
                    f,
                    "Insufficient data: expected {} bytes, got {}",
                    expected, actual
                )
            }
            PacketDecodeError::InvalidValue { field, value } => {
                write!(f, "Invalid value for field '{}': {}", field, value)
            }
            PacketDecodeError::Malformed(msg) => {
                write!(f, "Malformed packet: {}", msg)
            }
        }
    }
}

impl std::error::Error for PacketDecodeError {}

/// Packet encode error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEncodeError {
    /// Variable frame longer than its u16 length field can describe
    FrameTooLarge { opcode: u8, length: usize },
    /// Fixed packet wrote a different number of bytes than its size
    LengthMismatch {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for PacketEncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketEncodeError::FrameTooLarge { opcode, length } => {
                write!(
                    f,
                    "Frame too large for opcode 0x{:02X}: {} bytes (max {})",
                    opcode,
                    length,
                    u16::MAX
                )
            }
            PacketEncodeError::LengthMismatch {
                opcode,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Fixed packet 0x{:02X} wrote {} bytes, expected {}",
                    opcode, actual, expected
                )
            }
        }
    }
}

impl std::error::Error for PacketEncodeError {}

/// A protocol packet instance
///
/// Implementors provide the payload codecs; [`Packet::try_parse`] and
/// [`Packet::write`] handle the opcode and length envelope shared by every
/// packet.
pub trait Packet: Any + Send + Sync + fmt::Debug {
    /// The packet opcode
    fn opcode(&self) -> u8;

    /// The framing rule for this packet
    fn sizing(&self) -> PacketSizing;

    /// Decode the payload; the reader starts right after the opcode byte
    fn parse_payload(&mut self, reader: &mut PacketReader<'_>)
        -> Result<(), PacketDecodeError>;

    /// Encode the payload (everything after the opcode and length field)
    fn write_payload(&self, writer: &mut PacketWriter);

    /// Upcast for downcasting by consumers
    fn as_any(&self) -> &dyn Any;

    /// Wire length of this packet's framing rule, `-1` for variable
    fn length(&self) -> i32 {
        self.sizing().length()
    }

    /// Validate the frame envelope and decode the payload.
    ///
    /// `frame` is the complete wire frame, opcode included. The borrow ends
    /// when this call returns.
    fn try_parse(&mut self, frame: &[u8]) -> Result<(), PacketDecodeError> {
        let actual = *frame.first().ok_or(PacketDecodeError::InsufficientData {
            expected: 1,
            actual: 0,
        })?;
        if actual != self.opcode() {
            return Err(PacketDecodeError::OpcodeMismatch {
                expected: self.opcode(),
                actual,
            });
        }

        let mut reader = PacketReader::new(frame);
        reader.skip(1)?;

        match self.sizing() {
            PacketSizing::Fixed(size) => {
                if frame.len() != size {
                    return Err(PacketDecodeError::LengthMismatch {
                        expected: size,
                        actual: frame.len(),
                    });
                }
            }
            PacketSizing::Variable => {
                let declared = reader.read_u16()? as usize;
                if declared != frame.len() {
                    return Err(PacketDecodeError::LengthMismatch {
                        expected: declared,
                        actual: frame.len(),
                    });
                }
            }
        }

        self.parse_payload(&mut reader)
    }

    /// Serialize the full wire frame into `writer`.
    ///
    /// On error nothing is left behind in `writer`.
    fn write(&self, writer: &mut PacketWriter) -> Result<(), PacketEncodeError> {
        let start = writer.position();
        writer.write_u8(self.opcode());

        let result = match self.sizing() {
            PacketSizing::Fixed(size) => {
                self.write_payload(writer);
                let actual = writer.position() - start;
                if actual == size {
                    Ok(())
                } else {
                    Err(PacketEncodeError::LengthMismatch {
                        opcode: self.opcode(),
                        expected: size,
                        actual,
                    })
                }
            }
            PacketSizing::Variable => {
                writer.write_u16(0);
                self.write_payload(writer);
                let total = writer.position() - start;
                match u16::try_from(total) {
                    Ok(length) => {
                        writer.patch_u16(start + 1, length);
                        Ok(())
                    }
                    Err(_) => Err(PacketEncodeError::FrameTooLarge {
                        opcode: self.opcode(),
                        length: total,
                    }),
                }
            }
        };

        if result.is_err() {
            writer.truncate(start);
        }
        result
    }
}

impl dyn Packet {
    /// Downcast to a concrete packet type
    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Packet types that declare their own framing metadata
pub trait PacketMetadata: Packet + Default {
    /// The packet opcode
    const OPCODE: u8;

    /// The framing rule
    const SIZING: PacketSizing;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Sample {
        value: u16,
    }

    impl Packet for Sample {
        fn opcode(&self) -> u8 {
            0x10
        }

        fn sizing(&self) -> PacketSizing {
            PacketSizing::Fixed(3)
        }

        fn parse_payload(
            &mut self,
            reader: &mut PacketReader<'_>,
        ) -> Result<(), PacketDecodeError> {
            self.value = reader.read_u16()?;
            Ok(())
        }

        fn write_payload(&self, writer: &mut PacketWriter) {
            writer.write_u16(self.value);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug, Default)]
    struct Blob {
        body: Vec<u8>,
    }

    impl Packet for Blob {
        fn opcode(&self) -> u8 {
            0x20
        }

        fn sizing(&self) -> PacketSizing {
            PacketSizing::Variable
        }

        fn parse_payload(
            &mut self,
            reader: &mut PacketReader<'_>,
        ) -> Result<(), PacketDecodeError> {
            self.body = reader.read_remaining().to_vec();
            Ok(())
        }

        fn write_payload(&self, writer: &mut PacketWriter) {
            writer.write_bytes(&self.body);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_sizing_length_sentinel() {
        assert_eq!(PacketSizing::Fixed(7).length(), 7);
        assert_eq!(PacketSizing::Variable.length(), VARIABLE_LENGTH);
        assert!(PacketSizing::Variable.is_variable());
        assert_eq!(PacketSizing::Fixed(2).fixed_size(), Some(2));
    }

    #[test]
    fn test_fixed_parse() {
        let mut sample = Sample::default();
        sample.try_parse(&[0x10, 0xAB, 0xCD]).unwrap();
        assert_eq!(sample.value, 0xABCD);
    }

    #[test]
    fn test_fixed_length_mismatch() {
        let mut sample = Sample::default();
        let err = sample.try_parse(&[0x10, 0xAB]).unwrap_err();
        assert!(err.is_length_error());
    }

    #[test]
    fn test_opcode_mismatch() {
        let mut sample = Sample::default();
        assert_eq!(
            sample.try_parse(&[0x11, 0, 0]).unwrap_err(),
            PacketDecodeError::OpcodeMismatch {
                expected: 0x10,
                actual: 0x11
            }
        );
    }

    #[test]
    fn test_variable_write_patches_length() {
        let blob = Blob {
            body: vec![1, 2, 3, 4],
        };
        let mut writer = PacketWriter::new();
        blob.write(&mut writer).unwrap();
        assert_eq!(writer.as_bytes(), &[0x20, 0x00, 0x07, 1, 2, 3, 4]);

        let mut parsed = Blob::default();
        parsed.try_parse(writer.as_bytes()).unwrap();
        assert_eq!(parsed.body, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_variable_write_rejects_oversize_frame() {
        let mut writer = PacketWriter::new();
        writer.write_u8(0xFF);

        let blob = Blob {
            body: vec![0u8; 70_000],
        };
        assert_eq!(
            blob.write(&mut writer).unwrap_err(),
            PacketEncodeError::FrameTooLarge {
                opcode: 0x20,
                length: 70_003
            }
        );
        // Earlier bytes survive, the rejected frame does not
        assert_eq!(writer.as_bytes(), &[0xFF]);

        let largest = Blob {
            body: vec![0u8; u16::MAX as usize - VARIABLE_HEADER_SIZE],
        };
        writer.clear();
        largest.write(&mut writer).unwrap();
        assert_eq!(&writer.as_bytes()[..3], &[0x20, 0xFF, 0xFF]);
    }

    #[derive(Debug, Default)]
    struct Short;

    impl Packet for Short {
        fn opcode(&self) -> u8 {
            0x30
        }

        fn sizing(&self) -> PacketSizing {
            PacketSizing::Fixed(5)
        }

        fn parse_payload(
            &mut self,
            _reader: &mut PacketReader<'_>,
        ) -> Result<(), PacketDecodeError> {
            Ok(())
        }

        fn write_payload(&self, writer: &mut PacketWriter) {
            writer.write_u16(1);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_fixed_write_rejects_wrong_length() {
        let mut writer = PacketWriter::new();
        assert_eq!(
            Short.write(&mut writer).unwrap_err(),
            PacketEncodeError::LengthMismatch {
                opcode: 0x30,
                expected: 5,
                actual: 3
            }
        );
        assert!(writer.is_empty());
    }

    #[test]
    fn test_downcast() {
        let boxed: Box<dyn Packet> = Box::new(Sample { value: 5 });
        assert_eq!(boxed.downcast_ref::<Sample>().map(|p| p.value), Some(5));
        assert!(boxed.downcast_ref::<Blob>().is_none());
    }
}
