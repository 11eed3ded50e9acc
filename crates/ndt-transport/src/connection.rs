//! # Control Connection
//!
//! Exclusive handle to one control-channel byte stream. Whether the stream
//! is TLS-wrapped is a capability flag on the handle, never a branch in the
//! codecs above it — the framing layers see only `Read + Write`.
//!
//! The checked read primitives (`read_u8`, `read_u16_be`, `read_u64_be`,
//! `read_exact`) are the only way protocol code consumes inbound bytes, so
//! every length field is pulled through a bounds-checked path. A read that
//! trips the socket's externally-configured deadline surfaces as
//! [`Error::Timeout`] rather than a generic I/O failure.

use std::io::{self, Read, Write};

use crate::error::Error;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Attempts granted to a write before giving up with `RetriesExhausted`.
pub const WRITE_RETRIES: usize = 5;

// ─── Connection ─────────────────────────────────────────────────────────────

/// An ownership-exclusive control connection.
pub struct Connection<S> {
    stream: S,
    secured: bool,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap a plaintext stream.
    pub fn new(stream: S) -> Self {
        Connection {
            stream,
            secured: false,
        }
    }

    /// Wrap a stream that already carries TLS.
    pub fn secured(stream: S) -> Self {
        Connection {
            stream,
            secured: true,
        }
    }

    /// Whether the underlying stream is TLS-wrapped.
    pub fn is_secured(&self) -> bool {
        self.secured
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Read exactly `buf.len()` bytes or fail.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.stream.read_exact(buf).map_err(map_read_err)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    /// Read a big-endian 16-bit integer.
    pub fn read_u16_be(&mut self) -> Result<u16, Error> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    /// Read a big-endian 64-bit integer.
    pub fn read_u64_be(&mut self) -> Result<u64, Error> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Write the whole buffer, retrying a stalled (zero-byte) write up to
    /// [`WRITE_RETRIES`] times. Hard I/O errors fail fast; spending the
    /// budget yields `RetriesExhausted`.
    pub fn write_all_retry(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut written = 0;
        for _ in 0..WRITE_RETRIES {
            while written < buf.len() {
                match self.stream.write(&buf[written..]) {
                    // Stalled: burn one retry and pick up where we left off.
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::Write(e)),
                }
            }
            if written == buf.len() {
                self.stream.flush().map_err(Error::Write)?;
                return Ok(());
            }
        }
        Err(Error::RetriesExhausted)
    }
}

fn map_read_err(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Read(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockStream;

    #[test]
    fn read_primitives_decode_big_endian() {
        let mut conn = Connection::new(MockStream::new(vec![
            0x07, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34,
        ]));
        assert_eq!(conn.read_u8().unwrap(), 0x07);
        assert_eq!(conn.read_u16_be().unwrap(), 0x0102);
        assert_eq!(conn.read_u64_be().unwrap(), 0x1234);
    }

    #[test]
    fn short_read_is_read_error() {
        let mut conn = Connection::new(MockStream::new(vec![0x01]));
        assert!(matches!(conn.read_u16_be(), Err(Error::Read(_))));
    }

    #[test]
    fn drained_stream_with_deadline_is_timeout() {
        let mut conn = Connection::new(MockStream::new(vec![]).timeout_on_drain());
        assert!(matches!(conn.read_u8(), Err(Error::Timeout)));
    }

    #[test]
    fn write_all_retry_passes_bytes_through() {
        let mut conn = Connection::new(MockStream::new(vec![]));
        conn.write_all_retry(b"123456 654321").unwrap();
        assert_eq!(conn.into_inner().output, b"123456 654321");
    }

    #[test]
    fn stalled_writes_exhaust_the_budget() {
        let mut conn = Connection::new(MockStream::new(vec![]).refuse_writes());
        assert!(matches!(
            conn.write_all_retry(b"x"),
            Err(Error::RetriesExhausted)
        ));
    }

    #[test]
    fn secured_flag_is_a_capability_not_a_branch() {
        let conn = Connection::secured(MockStream::new(vec![]));
        assert!(conn.is_secured());
        assert!(!Connection::new(MockStream::new(vec![])).is_secured());
    }
}
