//! Circular receive buffer
//!
//! A fixed-capacity byte ring owned by a single connection's read loop.
//! Socket reads append at the tail; the framer inspects bytes with
//! [`RingBuffer::peek`] and commits consumption with [`RingBuffer::advance`]
//! once a frame has been handled. Storage is allocated once and never grows.
//!
//! Every mutating method is synchronous and either completes fully or leaves
//! the buffer untouched, so cancelling the surrounding task can never observe
//! a half-applied append or advance.

use std::borrow::Cow;

use crate::error::BufferError;

/// Default ring capacity (64KB, the largest frame a 2-byte length can declare)
pub const DEFAULT_CAPACITY: usize = 65536;

/// Fixed-capacity circular byte buffer
#[derive(Debug)]
pub struct RingBuffer {
    /// Backing storage
    data: Box<[u8]>,
    /// Offset of the first unread byte
    head: usize,
    /// Offset one past the last written byte
    tail: usize,
    /// Number of buffered bytes
    count: usize,
}

impl RingBuffer {
    /// Create a ring buffer with the given capacity
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    // ============ Properties ============

    /// Total capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of buffered bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the buffer holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Check if the buffer has no free space
    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Free space in bytes
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.count
    }

    // ============ Writing ============

    /// Append as many bytes as fit, returning how many were accepted.
    ///
    /// A return value smaller than `bytes.len()` means the buffer filled up.
    /// The caller frames what it has and offers the rest again; a full
    /// buffer that holds no complete frame is a pending buffer overflow.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.free());
        if accepted == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first = accepted.min(capacity - self.tail);
        self.data[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);

        let rest = accepted - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&bytes[first..accepted]);
        }

        self.tail = (self.tail + accepted) % capacity;
        self.count += accepted;
        accepted
    }

    // ============ Reading ============

    /// Get the byte at a logical position from the head
    pub fn get(&self, index: usize) -> Result<u8, BufferError> {
        if index >= self.count {
            return Err(BufferError::BufferIndexOutOfRange {
                index,
                count: self.count,
            });
        }
        Ok(self.data[(self.head + index) % self.capacity()])
    }

    /// Read a big-endian u16 starting at a logical position
    pub fn get_u16(&self, index: usize) -> Result<u16, BufferError> {
        let high = self.get(index)? as u16;
        let low = self.get(index + 1)? as u16;
        Ok((high << 8) | low)
    }

    /// View the first `count` buffered bytes without consuming them.
    ///
    /// The view is always logically contiguous: it borrows the backing
    /// storage when the span does not cross the physical end and copies
    /// otherwise.
    pub fn peek(&self, count: usize) -> Result<Cow<'_, [u8]>, BufferError> {
        self.ensure_available(count)?;

        let capacity = self.capacity();
        if self.head + count <= capacity {
            return Ok(Cow::Borrowed(&self.data[self.head..self.head + count]));
        }

        let first = capacity - self.head;
        let mut joined = Vec::with_capacity(count);
        joined.extend_from_slice(&self.data[self.head..]);
        joined.extend_from_slice(&self.data[..count - first]);
        Ok(Cow::Owned(joined))
    }

    /// Consume `count` bytes from the head
    pub fn advance(&mut self, count: usize) -> Result<(), BufferError> {
        self.ensure_available(count)?;
        self.head = (self.head + count) % self.capacity();
        self.count -= count;
        if self.count == 0 {
            // Realign so the next frame is contiguous
            self.head = 0;
            self.tail = 0;
        }
        Ok(())
    }

    /// Copy out and consume `count` bytes
    pub fn read(&mut self, count: usize) -> Result<Vec<u8>, BufferError> {
        let bytes = self.peek(count)?.into_owned();
        self.advance(count)?;
        Ok(bytes)
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    fn ensure_available(&self, requested: usize) -> Result<(), BufferError> {
        if requested > self.count {
            return Err(BufferError::BufferEmpty {
                requested,
                available: self.count,
            });
        }
        Ok(())
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_in_order() {
        let mut ring = RingBuffer::new(32);
        assert_eq!(ring.write(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.read(5).unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wrap_around() {
        let mut ring = RingBuffer::new(16);
        let first: Vec<u8> = (0..10).collect();
        let second: Vec<u8> = (10..20).collect();

        assert_eq!(ring.write(&first), 10);
        assert_eq!(ring.read(5).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(ring.write(&second), 10);
        assert_eq!(ring.len(), 15);

        // Span crosses the physical end of storage
        let view = ring.peek(15).unwrap();
        assert!(matches!(view, Cow::Owned(_)));
        let expected: Vec<u8> = (5..20).collect();
        assert_eq!(view.as_ref(), expected.as_slice());

        assert_eq!(ring.read(15).unwrap(), expected);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_contiguous_peek_borrows() {
        let mut ring = RingBuffer::new(16);
        ring.write(&[9, 8, 7]);
        assert!(matches!(ring.peek(3).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_write_stops_at_capacity() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.write(&[0; 6]), 6);
        assert_eq!(ring.write(&[1; 6]), 2);
        assert!(ring.is_full());
        assert_eq!(ring.write(&[2]), 0);
    }

    #[test]
    fn test_peek_past_available_is_buffer_empty() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1, 2]);
        assert_eq!(
            ring.peek(3).unwrap_err(),
            BufferError::BufferEmpty {
                requested: 3,
                available: 2
            }
        );
        assert!(matches!(
            ring.advance(3),
            Err(BufferError::BufferEmpty { .. })
        ));
        // Failed advance leaves the contents untouched
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_index_at_count_is_out_of_range() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1, 2]);
        assert_eq!(ring.get(1).unwrap(), 2);
        assert_eq!(
            ring.get(2).unwrap_err(),
            BufferError::BufferIndexOutOfRange { index: 2, count: 2 }
        );
    }

    #[test]
    fn test_get_u16_across_wrap() {
        let mut ring = RingBuffer::new(4);
        ring.write(&[0, 0, 0]);
        ring.advance(3).unwrap();
        // Draining realigns the head to zero, so force a wrap explicitly
        ring.write(&[0, 0, 0]);
        ring.advance(2).unwrap();
        ring.write(&[0x12, 0x34]);
        assert_eq!(ring.get(1).unwrap(), 0x12);
        assert_eq!(ring.get_u16(1).unwrap(), 0x1234);
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.free(), 8);
    }
}
