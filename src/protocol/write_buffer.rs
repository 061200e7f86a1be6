//! Outgoing byte buffer with a consumption cursor.
//!
//! Encoders append complete frames at the tail; the transport drains from
//! `position`. Appends are amortised O(1), consumption is cursor movement
//! only, and the wasted prefix is bounded by compaction:
//!
//! - fully drained: the storage is cleared, or released entirely once the
//!   allocation has reached [`BIG_ALLOC_THRESHOLD`];
//! - cursor past the midpoint with unread bytes behind it: the unread tail
//!   is moved to the front.

use bytes::Bytes;

use super::wire_format::{BIG_ALLOC_THRESHOLD, INITIAL_ALLOC};
use crate::error::{Error, Result};

/// Grow `buf` so it can hold `additional` more bytes.
///
/// Doubles the current allocation (never below `floor`) and takes the exact
/// requested size when doubling is not enough. Failure leaves `buf` intact.
pub(crate) fn reserve_amortized(buf: &mut Vec<u8>, additional: usize, floor: usize) -> Result<()> {
    let needed = buf.len().checked_add(additional).ok_or(Error::OutOfMemory)?;
    if needed <= buf.capacity() {
        return Ok(());
    }
    let target = needed.max(buf.capacity().saturating_mul(2)).max(floor);
    buf.try_reserve_exact(target - buf.len())
        .map_err(|_| Error::OutOfMemory)
}

/// Buffer holding encoded frames awaiting transmission.
///
/// Unread bytes are the region between the cursor and the tail. All bytes
/// handed out are copies; the caller owns them independently of the buffer.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: Vec<u8>,
    /// Offset of the first unread byte. Invariant: `position <= buf.len()`.
    position: usize,
    initial_alloc: usize,
    big_alloc_threshold: usize,
}

impl WriteBuffer {
    /// Create an empty buffer with the default allocation limits.
    ///
    /// No storage is allocated until the first append.
    pub fn new() -> Self {
        Self::with_limits(INITIAL_ALLOC, BIG_ALLOC_THRESHOLD)
    }

    /// Create an empty buffer with custom allocation limits.
    ///
    /// `initial_alloc` is the smallest allocation made on first use;
    /// `big_alloc_threshold` is the size at or above which a drained buffer
    /// releases its storage instead of retaining it.
    pub fn with_limits(initial_alloc: usize, big_alloc_threshold: usize) -> Self {
        Self {
            buf: Vec::new(),
            position: 0,
            initial_alloc,
            big_alloc_threshold,
        }
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - self.position
    }

    /// Whether all appended bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.position == self.buf.len()
    }

    /// The unread region.
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.position..]
    }

    /// Ensure room for `additional` more bytes.
    ///
    /// Encoders reserve a whole frame before writing any of it, so a failed
    /// reservation leaves no partial frame behind.
    pub(crate) fn reserve(&mut self, additional: usize) -> Result<()> {
        reserve_amortized(&mut self.buf, additional, self.initial_alloc)
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn put_slice(&mut self, s: &[u8]) {
        self.buf.extend_from_slice(s);
    }

    /// Copy up to `max` unread bytes, advancing the cursor when `consume`.
    ///
    /// Returns `None` when nothing is unread.
    pub fn get_bytes(&mut self, max: usize, consume: bool) -> Option<Bytes> {
        if self.is_empty() {
            return None;
        }
        let n = max.min(self.len());
        let out = Bytes::copy_from_slice(&self.buf[self.position..self.position + n]);
        if consume {
            self.consume(n);
        }
        Some(out)
    }

    /// Advance the cursor by up to `n` bytes; returns the unread count left.
    pub fn consume(&mut self, n: usize) -> usize {
        self.position += n.min(self.len());
        self.reset_or_compact();
        self.len()
    }

    fn reset_or_compact(&mut self) {
        if self.position == self.buf.len() {
            if self.buf.capacity() >= self.big_alloc_threshold {
                self.buf = Vec::new();
            } else {
                self.buf.clear();
            }
            self.position = 0;
        } else if self.position > self.buf.capacity() / 2 {
            // Unread tail exists (the drained case was handled above); move
            // it to the front so the wasted prefix stays below half the
            // allocation.
            let len = self.buf.len();
            self.buf.copy_within(self.position..len, 0);
            self.buf.truncate(len - self.position);
            self.position = 0;
        }
    }

    /// Current allocation size in bytes.
    pub fn allocated(&self) -> usize {
        self.buf.capacity()
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(buf: &mut WriteBuffer, data: &[u8]) {
        buf.reserve(data.len()).unwrap();
        buf.put_slice(data);
    }

    #[test]
    fn test_starts_unallocated() {
        let buf = WriteBuffer::new();
        assert_eq!(buf.allocated(), 0);
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_first_append_allocates_initial_size() {
        let mut buf = WriteBuffer::with_limits(64, 256);
        append(&mut buf, b"abc");
        assert!(buf.allocated() >= 64);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_get_bytes_peek_does_not_consume() {
        let mut buf = WriteBuffer::new();
        append(&mut buf, b"hello world");

        let peeked = buf.get_bytes(5, false).unwrap();
        assert_eq!(&peeked[..], b"hello");
        assert_eq!(buf.len(), 11);

        let taken = buf.get_bytes(5, true).unwrap();
        assert_eq!(&taken[..], b"hello");
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.unread(), b" world");
    }

    #[test]
    fn test_get_bytes_empty_returns_none() {
        let mut buf = WriteBuffer::new();
        assert!(buf.get_bytes(16, true).is_none());

        append(&mut buf, b"x");
        buf.consume(1);
        assert!(buf.get_bytes(16, true).is_none());
    }

    #[test]
    fn test_get_bytes_clamps_to_unread() {
        let mut buf = WriteBuffer::new();
        append(&mut buf, b"abc");
        let all = buf.get_bytes(usize::MAX, true).unwrap();
        assert_eq!(&all[..], b"abc");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_consume_returns_remaining() {
        let mut buf = WriteBuffer::new();
        append(&mut buf, b"0123456789");
        assert_eq!(buf.consume(4), 6);
        assert_eq!(buf.consume(100), 0);
    }

    #[test]
    fn test_byte_conservation() {
        // len() equals bytes appended minus bytes consumed, across an
        // arbitrary interleaving.
        let mut buf = WriteBuffer::with_limits(16, 1024);
        let mut appended = 0usize;
        let mut consumed = 0usize;

        for round in 0..50 {
            let chunk = vec![round as u8; 7 + round % 13];
            append(&mut buf, &chunk);
            appended += chunk.len();

            let take = round % 11;
            let before = buf.len();
            buf.consume(take);
            consumed += take.min(before);

            assert_eq!(buf.len(), appended - consumed);
        }
    }

    #[test]
    fn test_compaction_preserves_unread_bytes() {
        let mut buf = WriteBuffer::with_limits(32, 4096);
        let data: Vec<u8> = (0..=255).collect();
        append(&mut buf, &data);

        // Drain past the midpoint so compaction kicks in, then verify the
        // unread region still matches the outstanding suffix.
        buf.consume(200);
        assert_eq!(buf.unread(), &data[200..]);
        assert_eq!(buf.len(), 56);

        append(&mut buf, b"tail");
        let mut expected = data[200..].to_vec();
        expected.extend_from_slice(b"tail");
        assert_eq!(buf.unread(), &expected[..]);
    }

    #[test]
    fn test_compaction_resets_position() {
        let mut buf = WriteBuffer::with_limits(16, 4096);
        append(&mut buf, &[0xAA; 100]);
        buf.consume(90);
        // Cursor was past the midpoint; the tail must now sit at the front.
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.unread(), &[0xAA; 10]);
    }

    #[test]
    fn test_drain_retains_small_allocation() {
        let mut buf = WriteBuffer::with_limits(64, 1024 * 1024);
        append(&mut buf, b"small");
        buf.consume(5);
        assert!(buf.is_empty());
        assert!(buf.allocated() > 0);
    }

    #[test]
    fn test_drain_releases_big_allocation() {
        let mut buf = WriteBuffer::with_limits(64, 256);
        append(&mut buf, &[0u8; 300]);
        assert!(buf.allocated() >= 256);

        buf.consume(300);
        assert_eq!(buf.allocated(), 0);

        // Lazily re-allocated on next use.
        append(&mut buf, b"again");
        assert_eq!(buf.unread(), b"again");
    }

    #[test]
    fn test_growth_doubles() {
        let mut buf = WriteBuffer::with_limits(8, 1 << 30);
        append(&mut buf, &[1u8; 8]);
        let first = buf.allocated();
        append(&mut buf, &[2u8; 1]);
        assert!(buf.allocated() >= first * 2);
    }

    #[test]
    fn test_growth_takes_exact_when_doubling_insufficient() {
        let mut buf = WriteBuffer::with_limits(8, 1 << 30);
        append(&mut buf, &[0u8; 4]);
        append(&mut buf, &[0u8; 1000]);
        assert!(buf.allocated() >= 1004);
        assert_eq!(buf.len(), 1004);
    }
}
