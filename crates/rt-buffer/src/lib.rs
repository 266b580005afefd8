//! Bounded byte containers sitting between the OS socket and the wire codec.
//!
//! Two variants are provided: [`Buffer`], a linear grow-by-doubling container
//! used for inbound framing, and [`CircularBuffer`], a wraparound container
//! used for outbound traffic so a full drain never needs to memmove the
//! unsent tail. Both can optionally tee every byte to a raw capture log via
//! [`raw_log::RawLog`] for reconstructing application framing from a packet
//! capture.

pub mod raw_log;

use std::io::{Read, Write};

pub use raw_log::RawLog;

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer ceiling {ceiling} reached (requested {requested})")]
    CapacityExceeded { ceiling: usize, requested: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("offset {off} + len {len} exceeds buffer length {have}")]
    OutOfRange { off: usize, len: usize, have: usize },
}

/// Default starting capacity for a freshly constructed [`Buffer`].
const DEFAULT_INITIAL_CAP: usize = 4096;

/// A linear, grow-by-doubling byte buffer with a hard capacity ceiling.
///
/// Valid bytes occupy `data[0..len]`. `read_in` appends at the write cursor
/// (`len`), growing the backing store by doubling until `ceiling` is hit, at
/// which point it refuses to grow further so the caller (normally a
/// [`rt-socket`](../rt_socket) `Socket`) can signal back-pressure instead of
/// consuming unbounded memory.
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
    ceiling: usize,
    raw_log: Option<RawLog>,
}

impl Buffer {
    pub fn new(ceiling: usize) -> Self {
        Self {
            data: vec![0u8; DEFAULT_INITIAL_CAP.min(ceiling).max(1)],
            len: 0,
            ceiling,
            raw_log: None,
        }
    }

    pub fn with_raw_log(mut self, log: RawLog) -> Self {
        self.raw_log = Some(log);
        self
    }

    /// Number of valid bytes currently buffered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The valid byte region.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Append `bytes` at the write cursor, growing (doubling) as needed.
    /// Fails with [`BufferError::CapacityExceeded`] rather than growing past
    /// `ceiling`.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ensure_capacity(self.len + bytes.len())?;
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        if let Some(log) = &mut self.raw_log {
            log.tee_inbound(bytes)?;
        }
        Ok(())
    }

    /// Slide the tail `[off..off+len)` down to the front, discarding
    /// everything before `off` and truncating to `len`. Used after a codec
    /// has consumed a framed message and only a partial trailing message
    /// remains.
    pub fn consume(&mut self, off: usize, len: usize) -> Result<(), BufferError> {
        if off + len > self.len {
            return Err(BufferError::OutOfRange {
                off,
                len,
                have: self.len,
            });
        }
        self.data.copy_within(off..off + len, 0);
        self.len = len;
        Ok(())
    }

    /// Read up to `n` bytes from `reader` into the write cursor, growing the
    /// buffer as needed. Returns the number of bytes read (0 at EOF).
    pub fn read_in<R: Read>(&mut self, reader: &mut R, n: usize) -> Result<usize, BufferError> {
        self.ensure_capacity(self.len + n)?;
        let read = reader.read(&mut self.data[self.len..self.len + n])?;
        if let Some(log) = &mut self.raw_log {
            log.tee_inbound(&self.data[self.len..self.len + read])?;
        }
        self.len += read;
        Ok(read)
    }

    /// Write `n` bytes starting at `off` out to `writer`.
    pub fn write_out<W: Write>(
        &mut self,
        writer: &mut W,
        off: usize,
        n: usize,
    ) -> Result<usize, BufferError> {
        if off + n > self.len {
            return Err(BufferError::OutOfRange {
                off,
                len: n,
                have: self.len,
            });
        }
        let written = writer.write(&self.data[off..off + n])?;
        Ok(written)
    }

    fn ensure_capacity(&mut self, needed: usize) -> Result<(), BufferError> {
        if needed > self.ceiling {
            return Err(BufferError::CapacityExceeded {
                ceiling: self.ceiling,
                requested: needed,
            });
        }
        let mut cap = self.data.len();
        while cap < needed {
            cap = (cap * 2).min(self.ceiling).max(cap + 1);
        }
        if cap > self.data.len() {
            self.data.resize(cap, 0);
        }
        Ok(())
    }
}

/// A fixed-capacity wraparound buffer used for outbound traffic.
///
/// `push` writes across the wrap point in up to two segments and `write_out`
/// likewise drains in one or two syscalls, so a full outbound queue never
/// needs a memmove. `total_sent` is a monotonically increasing counter of
/// bytes successfully drained, independent of wraps.
pub struct CircularBuffer {
    data: Vec<u8>,
    head: usize, // next byte to drain
    tail: usize, // next free slot to write
    filled: usize,
    total_sent: u64,
    raw_log: Option<RawLog>,
}

impl CircularBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)],
            head: 0,
            tail: 0,
            filled: 0,
            total_sent: 0,
            raw_log: None,
        }
    }

    pub fn with_raw_log(mut self, log: RawLog) -> Self {
        self.raw_log = Some(log);
        self
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Fraction of capacity currently in use, in `[0.0, 1.0]`.
    pub fn fill_ratio(&self) -> f64 {
        self.filled as f64 / self.data.len() as f64
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    /// Push `bytes` onto the tail. Returns `CapacityExceeded` if there isn't
    /// room; the caller (a `Socket`) is expected to treat this as the
    /// "outbound queue full" failure in the error-handling design.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let cap = self.data.len();
        if bytes.len() > cap - self.filled {
            return Err(BufferError::CapacityExceeded {
                ceiling: cap,
                requested: self.filled + bytes.len(),
            });
        }
        let first = (cap - self.tail).min(bytes.len());
        self.data[self.tail..self.tail + first].copy_from_slice(&bytes[..first]);
        if first < bytes.len() {
            let rest = bytes.len() - first;
            self.data[..rest].copy_from_slice(&bytes[first..]);
            self.tail = rest;
        } else {
            self.tail = (self.tail + first) % cap;
        }
        self.filled += bytes.len();
        if let Some(log) = &mut self.raw_log {
            log.tee_outbound(bytes)?;
        }
        Ok(())
    }

    /// Drain up to `max_n` bytes out to `writer`, in one or two writes
    /// depending on whether the filled region wraps. Returns the number of
    /// bytes actually written.
    pub fn write_out<W: Write>(&mut self, writer: &mut W, max_n: usize) -> Result<usize, BufferError> {
        let cap = self.data.len();
        let n = max_n.min(self.filled);
        if n == 0 {
            return Ok(0);
        }
        let first = (cap - self.head).min(n);
        let mut written = writer.write(&self.data[self.head..self.head + first])?;
        if written == first && n > first {
            let rest = n - first;
            written += writer.write(&self.data[..rest])?;
        }
        self.head = (self.head + written) % cap;
        self.filled -= written;
        self.total_sent += written as u64;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn buffer_push_then_bytes_returns_pushed_data() {
        let mut b = Buffer::new(1024);
        b.push(b"hello").unwrap();
        assert_eq!(b.bytes(), b"hello");
    }

    #[test]
    fn buffer_grows_by_doubling_up_to_ceiling() {
        let mut b = Buffer::new(16);
        assert!(b.push(&[0u8; 10]).is_ok());
        assert!(b.capacity() <= 16);
        assert!(b.push(&[0u8; 10]).is_err(), "exceeding ceiling must fail");
    }

    #[test]
    fn buffer_consume_slides_tail_to_front() {
        let mut b = Buffer::new(1024);
        b.push(b"abcdef").unwrap();
        b.consume(2, 4).unwrap();
        assert_eq!(b.bytes(), b"cdef");
    }

    #[test]
    fn buffer_consume_out_of_range_errors() {
        let mut b = Buffer::new(1024);
        b.push(b"abc").unwrap();
        assert!(b.consume(0, 10).is_err());
    }

    #[test]
    fn buffer_read_in_appends_from_reader() {
        let mut b = Buffer::new(1024);
        let mut src = Cursor::new(b"worldwide".to_vec());
        let n = b.read_in(&mut src, 5).unwrap();
        assert_eq!(n, 5);
        assert_eq!(b.bytes(), b"world");
    }

    #[test]
    fn buffer_write_out_drains_from_offset() {
        let mut b = Buffer::new(1024);
        b.push(b"0123456789").unwrap();
        let mut dst = Vec::new();
        let n = b.write_out(&mut dst, 3, 4).unwrap();
        assert_eq!(n, 4);
        assert_eq!(dst, b"3456");
    }

    #[test]
    fn circular_buffer_push_and_drain_roundtrip() {
        let mut c = CircularBuffer::new(8);
        c.push(b"abcd").unwrap();
        let mut out = Vec::new();
        let n = c.write_out(&mut out, 4).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, b"abcd");
        assert_eq!(c.total_sent(), 4);
    }

    #[test]
    fn circular_buffer_wraps_across_the_boundary() {
        let mut c = CircularBuffer::new(8);
        c.push(b"123456").unwrap();
        let mut out = Vec::new();
        c.write_out(&mut out, 6).unwrap();
        // head/tail are both back at a non-zero offset; push again to force a wrap.
        c.push(b"abcdef").unwrap();
        let mut out2 = Vec::new();
        let n = c.write_out(&mut out2, 6).unwrap();
        assert_eq!(n, 6);
        assert_eq!(out2, b"abcdef");
    }

    #[test]
    fn circular_buffer_rejects_push_beyond_capacity() {
        let mut c = CircularBuffer::new(4);
        assert!(c.push(b"12345").is_err());
    }

    #[test]
    fn circular_buffer_fill_ratio_reflects_occupancy() {
        let mut c = CircularBuffer::new(10);
        c.push(&[0u8; 5]).unwrap();
        assert!((c.fill_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn circular_buffer_partial_drain_leaves_remainder_filled() {
        let mut c = CircularBuffer::new(16);
        c.push(b"0123456789").unwrap();
        let mut out = Vec::new();
        c.write_out(&mut out, 4).unwrap();
        assert_eq!(c.filled(), 6);
        assert_eq!(out, b"0123");
    }
}
