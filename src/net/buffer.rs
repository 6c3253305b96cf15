//! Packet field readers and writers
//!
//! Provides the byte-level codec used by packet payload parsers and writers:
//! - [`PacketReader`] borrows a framed slice for the duration of a single
//!   parse call and reads big-endian fields with bounds checks
//! - [`PacketWriter`] appends big-endian fields to a growable buffer and can
//!   back-patch a length field once the payload size is known
//!
//! All multi-byte protocol integers are big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::packet::PacketDecodeError;

/// Bounds-checked big-endian reader over a borrowed frame
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    /// Borrowed frame bytes
    data: &'a [u8],
    /// Current read position
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    // ============ Properties ============

    /// Get the current read position
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the total length of the underlying slice
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the underlying slice is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Check if there are bytes remaining to read
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Skip a number of bytes
    pub fn skip(&mut self, count: usize) -> Result<(), PacketDecodeError> {
        self.take(count).map(|_| ())
    }

    // ============ Reading Methods (Big-Endian) ============

    /// Read an unsigned byte
    pub fn read_u8(&mut self) -> Result<u8, PacketDecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> Result<i8, PacketDecodeError> {
        Ok(self.read_u8()? as i8)
    }

    /// Read an unsigned big-endian short (2 bytes)
    pub fn read_u16(&mut self) -> Result<u16, PacketDecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a signed big-endian short (2 bytes)
    pub fn read_i16(&mut self) -> Result<i16, PacketDecodeError> {
        Ok(self.read_u16()? as i16)
    }

    /// Read an unsigned big-endian int (4 bytes)
    pub fn read_u32(&mut self) -> Result<u32, PacketDecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a signed big-endian int (4 bytes)
    pub fn read_i32(&mut self) -> Result<i32, PacketDecodeError> {
        Ok(self.read_u32()? as i32)
    }

    /// Read an unsigned big-endian long (8 bytes)
    pub fn read_u64(&mut self) -> Result<u64, PacketDecodeError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Borrow the next `length` bytes
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8], PacketDecodeError> {
        self.take(length)
    }

    /// Borrow everything left in the frame
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    // ============ String Reading ============

    /// Read a null-terminated string; a missing terminator consumes the rest
    pub fn read_string(&mut self) -> Result<String, PacketDecodeError> {
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == 0);
        let text = &rest[..end.unwrap_or(rest.len())];
        self.pos += end.map(|e| e + 1).unwrap_or(rest.len());
        std::str::from_utf8(text)
            .map(str::to_owned)
            .map_err(|_| PacketDecodeError::InvalidValue {
                field: "string".to_string(),
                value: format!("{} non-utf8 bytes", text.len()),
            })
    }

    /// Read a fixed-width, zero-padded string
    pub fn read_fixed_string(&mut self, width: usize) -> Result<String, PacketDecodeError> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], PacketDecodeError> {
        if self.remaining() < count {
            return Err(PacketDecodeError::InsufficientData {
                expected: count,
                actual: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }
}

/// Big-endian packet writer
#[derive(Debug, Clone, Default)]
pub struct PacketWriter {
    /// Internal byte buffer
    data: BytesMut,
}

impl PacketWriter {
    /// Create a new empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Current write position (bytes written so far)
    #[inline]
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// Get the total length written
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the written bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Reset the writer, keeping its allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Discard everything written after `len` bytes
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    // ============ Writing Methods (Big-Endian) ============

    /// Write an unsigned byte
    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write a signed byte
    pub fn write_i8(&mut self, value: i8) {
        self.data.put_i8(value);
    }

    /// Write an unsigned big-endian short (2 bytes)
    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    /// Write a signed big-endian short (2 bytes)
    pub fn write_i16(&mut self, value: i16) {
        self.data.put_i16(value);
    }

    /// Write an unsigned big-endian int (4 bytes)
    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32(value);
    }

    /// Write a signed big-endian int (4 bytes)
    pub fn write_i32(&mut self, value: i32) {
        self.data.put_i32(value);
    }

    /// Write an unsigned big-endian long (8 bytes)
    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64(value);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Overwrite a previously written big-endian short
    ///
    /// # Panics
    /// Panics if `position + 2` exceeds the bytes written so far.
    pub fn patch_u16(&mut self, position: usize, value: u16) {
        self.data[position..position + 2].copy_from_slice(&value.to_be_bytes());
    }

    // ============ String Writing ============

    /// Write a null-terminated string
    pub fn write_string(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.write_u8(0);
    }

    /// Write a fixed-width string, truncating or zero-padding to `width`
    pub fn write_fixed_string(&mut self, value: &str, width: usize) {
        let bytes = value.as_bytes();
        let used = bytes.len().min(width);
        self.data.extend_from_slice(&bytes[..used]);
        self.data.put_bytes(0, width - used);
    }
}

impl AsRef<[u8]> for PacketWriter {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_read_write() {
        let mut writer = PacketWriter::new();
        writer.write_u8(255);
        writer.write_i8(-3);
        writer.write_u16(0x1234);
        writer.write_i32(-987654);
        writer.write_u64(123456789012345);

        let bytes = writer.freeze();
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 255);
        assert_eq!(reader.read_i8().unwrap(), -3);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i32().unwrap(), -987654);
        assert_eq!(reader.read_u64().unwrap(), 123456789012345);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_big_endian_layout() {
        let mut writer = PacketWriter::new();
        writer.write_u16(0x0102);
        writer.write_u32(0x03040506);
        assert_eq!(writer.as_bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_insufficient_data() {
        let mut reader = PacketReader::new(&[0x01]);
        assert!(matches!(
            reader.read_u16(),
            Err(PacketDecodeError::InsufficientData {
                expected: 2,
                actual: 1
            })
        ));
        // Failed read does not move the cursor
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_string() {
        let mut writer = PacketWriter::new();
        writer.write_string("Hello");
        writer.write_fixed_string("Bob", 6);

        let bytes = writer.freeze();
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_string().unwrap(), "Hello");
        assert_eq!(reader.read_fixed_string(6).unwrap(), "Bob");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_unterminated_string_consumes_rest() {
        let mut reader = PacketReader::new(b"abc");
        assert_eq!(reader.read_string().unwrap(), "abc");
        assert!(!reader.has_remaining());
    }

    #[test]
    fn test_patch_u16() {
        let mut writer = PacketWriter::new();
        writer.write_u8(0x03);
        writer.write_u16(0);
        writer.write_bytes(&[9, 9]);
        writer.patch_u16(1, writer.len() as u16);
        assert_eq!(writer.as_bytes(), &[0x03, 0x00, 0x05, 9, 9]);
    }
}
