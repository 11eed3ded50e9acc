//! Transport error taxonomy.
//!
//! Every failure the framing layers can produce is a typed variant; nothing
//! in this crate panics on peer-supplied bytes. `Timeout` is kept distinct
//! from `Read` so callers can tell a silent peer from a hostile one.

use std::io;

// ─── Error ──────────────────────────────────────────────────────────────────

/// Errors produced by the connection, wire codec, and WebSocket framer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A read failed or returned fewer bytes than the protocol requires.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    /// A write failed with a hard I/O error.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    /// The peer sent nothing before the socket's read deadline.
    #[error("peer silent past the read deadline")]
    Timeout,
    /// The fixed retry budget was spent without completing a write.
    #[error("write retry budget exhausted")]
    RetriesExhausted,
    /// A declared length exceeds the caller's ceiling. Raised before any
    /// payload byte is read or buffered.
    #[error("message of {len} bytes exceeds the {max} byte ceiling")]
    MessageTooLarge { len: u64, max: u64 },
    /// Length arithmetic on peer-controlled values would wrap.
    #[error("length arithmetic overflow")]
    Overflow,
    /// A client-to-server frame arrived without a mask (RFC 6455 §5.1).
    #[error("received an unmasked client frame")]
    Unmasked,
    /// The peer sent a CLOSE frame; a CLOSE response has been attempted.
    #[error("peer closed the websocket")]
    ConnectionClosed,
    /// Malformed or out-of-sequence peer data. Always terminates the session.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// The HTTP upgrade request is missing or mangling a required header.
    #[error("bad websocket handshake: {0}")]
    BadHandshake(String),
    /// An HTTP header line ran past the per-line bound without a newline.
    #[error("header line exceeds the per-line bound")]
    LineTooLong,
    /// A tunneled NDT message was shorter than its own header claims.
    #[error("malformed tunneled message")]
    BadMessage,
}
