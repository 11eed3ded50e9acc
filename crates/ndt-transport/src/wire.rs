//! # NDT Wire Format
//!
//! The fixed control-message envelope every exchange on the control channel
//! uses, WebSocket-tunneled or not:
//!
//! ```text
//!  0                   1                   2
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Kind      |        Length (16, BE)        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Payload (Length bytes)        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Kind values are an open enumeration: legacy peers are the authority on
//! the numbering, so unknown kinds pass through undisturbed.

use std::fmt;
use std::io::{Read, Write};

use bytes::BytesMut;

use crate::connection::Connection;
use crate::error::Error;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Header size: 1 (kind) + 2 (length).
pub const MSG_HEADER_LEN: usize = 3;

/// Largest payload the 16-bit length field can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// SRV_QUEUE payload telling the client its tests start immediately.
pub const SRV_QUEUE_TEST_STARTS_NOW: u16 = 0;
/// SRV_QUEUE payload reporting an unrecoverable server fault.
pub const SRV_QUEUE_SERVER_FAULT: u16 = 9977;
/// SRV_QUEUE payload asking the client to retry later.
pub const SRV_QUEUE_SERVER_BUSY: u16 = 9987;
/// SRV_QUEUE keepalive while the client waits in the queue.
pub const SRV_QUEUE_HEARTBEAT: u16 = 9990;
/// SRV_QUEUE payload asking the client to retry in 60 seconds.
pub const SRV_QUEUE_SERVER_BUSY_60S: u16 = 9999;

// ─── Message Kind ───────────────────────────────────────────────────────────

/// Control-message kind byte.
///
/// An open enumeration rather than a closed enum: the numeric values are
/// fixed by the deployed protocol and unknown values must round-trip for
/// interop with peers newer than this implementation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKind(pub u8);

impl MessageKind {
    pub const COMM_FAILURE: MessageKind = MessageKind(0);
    pub const SRV_QUEUE: MessageKind = MessageKind(1);
    pub const MSG_LOGIN: MessageKind = MessageKind(2);
    pub const TEST_PREPARE: MessageKind = MessageKind(3);
    pub const TEST_START: MessageKind = MessageKind(4);
    pub const TEST_MSG: MessageKind = MessageKind(5);
    pub const TEST_FINALIZE: MessageKind = MessageKind(6);
    pub const MSG_ERROR: MessageKind = MessageKind(7);
    pub const MSG_RESULTS: MessageKind = MessageKind(8);
    pub const MSG_LOGOUT: MessageKind = MessageKind(9);
    pub const MSG_WAITING: MessageKind = MessageKind(10);
    pub const MSG_EXTENDED_LOGIN: MessageKind = MessageKind(11);

    /// The raw kind byte.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            MessageKind::COMM_FAILURE => "COMM_FAILURE",
            MessageKind::SRV_QUEUE => "SRV_QUEUE",
            MessageKind::MSG_LOGIN => "MSG_LOGIN",
            MessageKind::TEST_PREPARE => "TEST_PREPARE",
            MessageKind::TEST_START => "TEST_START",
            MessageKind::TEST_MSG => "TEST_MSG",
            MessageKind::TEST_FINALIZE => "TEST_FINALIZE",
            MessageKind::MSG_ERROR => "MSG_ERROR",
            MessageKind::MSG_RESULTS => "MSG_RESULTS",
            MessageKind::MSG_LOGOUT => "MSG_LOGOUT",
            MessageKind::MSG_WAITING => "MSG_WAITING",
            MessageKind::MSG_EXTENDED_LOGIN => "MSG_EXTENDED_LOGIN",
            _ => return None,
        })
    }
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "MessageKind({})", self.0),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<u8> for MessageKind {
    fn from(b: u8) -> Self {
        MessageKind(b)
    }
}

// ─── Message ────────────────────────────────────────────────────────────────

/// One decoded control message. `payload.len()` always fits the 16-bit
/// length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Message {
    /// Serialize header + payload into a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(MSG_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&encode_header(self.kind, self.payload.len() as u16));
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Payload interpreted as UTF-8, lossily.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Encode the 3-byte header.
pub fn encode_header(kind: MessageKind, len: u16) -> [u8; MSG_HEADER_LEN] {
    let len_be = len.to_be_bytes();
    [kind.as_u8(), len_be[0], len_be[1]]
}

/// Decode the 3-byte header into kind and declared payload length.
pub fn decode_header(buf: &[u8; MSG_HEADER_LEN]) -> (MessageKind, u16) {
    (
        MessageKind(buf[0]),
        u16::from_be_bytes([buf[1], buf[2]]),
    )
}

// ─── Codec ──────────────────────────────────────────────────────────────────

/// Send one control message: 3-byte header, then the payload, each write
/// covered by the connection's retry budget.
pub fn send<S: Read + Write>(
    conn: &mut Connection<S>,
    kind: MessageKind,
    payload: &[u8],
) -> Result<(), Error> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::MessageTooLarge {
            len: payload.len() as u64,
            max: MAX_PAYLOAD_LEN as u64,
        });
    }
    conn.write_all_retry(&encode_header(kind, payload.len() as u16))?;
    conn.write_all_retry(payload)?;
    tracing::trace!(%kind, len = payload.len(), "sent control message");
    Ok(())
}

/// Receive one control message, rejecting any declared length above
/// `max_len` before the payload is read.
pub fn recv<S: Read + Write>(
    conn: &mut Connection<S>,
    max_len: usize,
) -> Result<Message, Error> {
    let mut header = [0u8; MSG_HEADER_LEN];
    conn.read_exact(&mut header)?;
    let (kind, len) = decode_header(&header);
    if len as usize > max_len {
        return Err(Error::MessageTooLarge {
            len: len as u64,
            max: max_len as u64,
        });
    }
    let mut payload = vec![0u8; len as usize];
    conn.read_exact(&mut payload)?;
    tracing::trace!(%kind, len, "received control message");
    Ok(Message { kind, payload })
}

// ─── Audit Seam ─────────────────────────────────────────────────────────────

/// Injected observer that sees the kind and raw payload of every message
/// that successfully crosses the control channel. Protocol-log writing
/// lives behind this seam, outside the framing core.
pub trait AuditSink: Send {
    fn on_send(&mut self, kind: MessageKind, payload: &[u8]);
    fn on_recv(&mut self, kind: MessageKind, payload: &[u8]);
}
