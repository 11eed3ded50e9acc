//! # WebSocket Framing Sublayer
//!
//! RFC 6455 server-role framer that tunnels the control protocol through
//! browser transports: HTTP upgrade handshake, frame parse/encode,
//! fragmentation reassembly with control-frame interleaving, and the
//! composition that carries one NDT message per Binary frame.
//!
//! Frame layout (RFC 6455 §5.2):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Payload lengths are attacker-controlled 64-bit values, so every offset
//! computation uses checked arithmetic and the caller's ceiling is enforced
//! before a single payload byte is read or buffered.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use sha1::{Digest, Sha1};

use crate::connection::Connection;
use crate::error::Error;
use crate::wire::{self, Message, MessageKind, MAX_PAYLOAD_LEN, MSG_HEADER_LEN};

// ─── Constants ──────────────────────────────────────────────────────────────

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// Per-line bound while reading the HTTP upgrade request.
const MAX_HEADER_LINE: usize = 8192;

/// Upper bound on header lines in one upgrade request.
const MAX_HEADER_COUNT: usize = 1024;

/// RFC 6455 §5.5: control-frame payloads may not exceed 125 bytes.
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// A `Sec-WebSocket-Key` is a base64-encoded 16-byte nonce: 24 characters.
const WS_KEY_LEN: usize = 24;

/// Fixed GUID concatenated with the client key to form the accept digest
/// (RFC 6455 §4.2.2).
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

// ─── Opcode ─────────────────────────────────────────────────────────────────

/// Frame opcode (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

// ─── Handshake ──────────────────────────────────────────────────────────────

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(ACCEPT_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// Complete an HTTP upgrade whose first `already_consumed` bytes were
/// sniffed off the stream by transport detection.
///
/// Validates the required upgrade headers, then answers with `101
/// Switching Protocols` and the computed accept key. When
/// `expected_subprotocol` is set, the client's `Sec-WebSocket-Protocol`
/// offer must list that exact token and the response echoes it; with no
/// expectation the header is ignored entirely, offered or not.
pub fn upgrade<S: Read + Write>(
    conn: &mut Connection<S>,
    already_consumed: &[u8],
    expected_subprotocol: Option<&str>,
) -> Result<(), Error> {
    let request_line = {
        let rest = read_line(conn)?;
        let mut line = String::from_utf8_lossy(already_consumed).into_owned();
        line.push_str(&rest);
        line
    };
    if !request_line.starts_with("GET ") || !request_line.ends_with(" HTTP/1.1") {
        return Err(Error::BadHandshake(format!(
            "not an HTTP GET request line: {request_line:?}"
        )));
    }

    let mut saw_upgrade = false;
    let mut saw_connection = false;
    let mut saw_version = false;
    // The subprotocol header is optional; without an expected token there is
    // nothing to check, with one the client must offer it.
    let mut saw_subprotocol = expected_subprotocol.is_none();
    let mut key: Option<String> = None;
    let mut terminated = false;

    for _ in 0..MAX_HEADER_COUNT {
        let line = read_line(conn)?;
        if line.is_empty() {
            terminated = true;
            break;
        }
        if line == "Upgrade: websocket" {
            saw_upgrade = true;
        } else if let Some(value) = line.strip_prefix("Connection: ") {
            saw_connection |= value.contains("Upgrade");
        } else if line == "Sec-WebSocket-Version: 13" {
            saw_version = true;
        } else if let Some(offer) = line.strip_prefix("Sec-WebSocket-Protocol: ") {
            if let Some(token) = expected_subprotocol {
                // The offer is a comma-separated token list; substring
                // matching would let "ndt2" satisfy "ndt".
                saw_subprotocol |= offer.split(',').any(|t| t.trim() == token);
            }
        } else if let Some(value) = line.strip_prefix("Sec-WebSocket-Key: ") {
            if value.len() != WS_KEY_LEN || !value.bytes().all(is_base64_char) {
                return Err(Error::BadHandshake(
                    "Sec-WebSocket-Key is not a 24-char base64 value".into(),
                ));
            }
            key = Some(value.to_string());
        }
    }

    if !(terminated && saw_upgrade && saw_connection && saw_version && saw_subprotocol) {
        return Err(Error::BadHandshake(
            "missing or invalid upgrade header".into(),
        ));
    }
    let key = key.ok_or_else(|| Error::BadHandshake("no Sec-WebSocket-Key".into()))?;

    let mut response = String::with_capacity(192);
    response.push_str(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n",
    );
    if let Some(token) = expected_subprotocol {
        response.push_str("Sec-WebSocket-Protocol: ");
        response.push_str(token);
        response.push_str("\r\n");
    }
    response.push_str("Sec-WebSocket-Accept: ");
    response.push_str(&accept_key(&key));
    response.push_str("\r\n\r\n");
    conn.write_all_retry(response.as_bytes())?;
    tracing::debug!("websocket upgrade complete");
    Ok(())
}

/// Read one header line, tolerating both `\r\n` and bare `\n` endings.
fn read_line<S: Read + Write>(conn: &mut Connection<S>) -> Result<String, Error> {
    let mut line: Vec<u8> = Vec::with_capacity(64);
    loop {
        if line.len() >= MAX_HEADER_LINE {
            return Err(Error::LineTooLong);
        }
        match conn.read_u8()? {
            b'\n' => {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map_err(|_| Error::BadHandshake("header line is not UTF-8".into()));
            }
            b => line.push(b),
        }
    }
}

fn is_base64_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

// ─── Frame Receive ──────────────────────────────────────────────────────────

struct FrameHeader {
    fin: bool,
    opcode: Opcode,
    mask: Option<[u8; 4]>,
    len: u64,
}

/// Read one frame header through the mask key, when present.
fn read_frame_header<S: Read + Write>(
    conn: &mut Connection<S>,
) -> Result<FrameHeader, Error> {
    let b0 = conn.read_u8()?;
    let b1 = conn.read_u8()?;
    let opcode = Opcode::from_bits(b0 & 0x0F)
        .ok_or(Error::ProtocolViolation("reserved opcode"))?;
    let len = match b1 & 0x7F {
        126 => u64::from(conn.read_u16_be()?),
        127 => conn.read_u64_be()?,
        n => u64::from(n),
    };
    let mask = if b1 & MASK_BIT != 0 {
        let mut key = [0u8; 4];
        conn.read_exact(&mut key)?;
        Some(key)
    } else {
        None
    };
    Ok(FrameHeader {
        fin: b0 & FIN_BIT != 0,
        opcode,
        mask,
        len,
    })
}

/// Receive one complete message, reassembling fragments and servicing
/// interleaved control frames.
///
/// `max_len` bounds the reassembled message; the bound and the overflow
/// check are applied to each frame's declared length before its payload is
/// read, so a hostile 64-bit length field can neither wrap the offset
/// arithmetic nor provoke a large allocation.
pub fn recv_message<S: Read + Write>(
    conn: &mut Connection<S>,
    max_len: usize,
) -> Result<Vec<u8>, Error> {
    let mut message: Vec<u8> = Vec::new();
    let mut offset: u64 = 0;
    let mut first_frame = true;

    loop {
        let frame = read_frame_header(conn)?;
        let next_offset = offset
            .checked_add(frame.len)
            .ok_or(Error::Overflow)?;
        if next_offset > max_len as u64 {
            return Err(Error::MessageTooLarge {
                len: next_offset,
                max: max_len as u64,
            });
        }
        let Some(mask) = frame.mask else {
            close_response(conn);
            return Err(Error::Unmasked);
        };
        if frame.opcode.is_control() && frame.len > MAX_CONTROL_PAYLOAD {
            return Err(Error::ProtocolViolation("oversized control frame"));
        }

        match frame.opcode {
            Opcode::Close => {
                // Nothing more can be read after a CLOSE; answer and stop.
                close_response(conn);
                return Err(Error::ConnectionClosed);
            }
            Opcode::Ping => {
                let mut payload = vec![0u8; frame.len as usize];
                conn.read_exact(&mut payload)?;
                apply_mask(&mut payload, mask);
                send_frame(conn, Opcode::Pong, &payload)?;
            }
            Opcode::Pong => {
                let mut discard = vec![0u8; frame.len as usize];
                conn.read_exact(&mut discard)?;
            }
            Opcode::Text | Opcode::Binary if first_frame => {
                read_data_frame(conn, &mut message, offset, next_offset, mask)?;
                offset = next_offset;
                first_frame = false;
                if frame.fin {
                    return Ok(message);
                }
            }
            Opcode::Continuation if !first_frame => {
                read_data_frame(conn, &mut message, offset, next_offset, mask)?;
                offset = next_offset;
                if frame.fin {
                    return Ok(message);
                }
            }
            // A second TEXT/BINARY mid-message, or CONTINUATION with no
            // message in progress.
            _ => return Err(Error::ProtocolViolation("opcode out of sequence")),
        }
    }
}

fn read_data_frame<S: Read + Write>(
    conn: &mut Connection<S>,
    message: &mut Vec<u8>,
    offset: u64,
    next_offset: u64,
    mask: [u8; 4],
) -> Result<(), Error> {
    message.resize(next_offset as usize, 0);
    let slot = &mut message[offset as usize..next_offset as usize];
    conn.read_exact(slot)?;
    apply_mask(slot, mask);
    Ok(())
}

/// XOR the payload with the 4-byte key. Applying the same key twice is the
/// identity, which is what makes the unmask in-place.
fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Best-effort CLOSE. Delivery is not checked; the session is over either
/// way.
fn close_response<S: Read + Write>(conn: &mut Connection<S>) {
    let _ = conn.write_all_retry(&[FIN_BIT | Opcode::Close as u8, 0x00]);
}

// ─── Frame Send ─────────────────────────────────────────────────────────────

/// Send one unfragmented frame. Server-to-client frames are never masked
/// (RFC 6455 §5.1).
pub fn send_frame<S: Read + Write>(
    conn: &mut Connection<S>,
    opcode: Opcode,
    payload: &[u8],
) -> Result<(), Error> {
    let len = payload.len() as u64;
    let mut frame = BytesMut::with_capacity(payload.len() + 10);
    frame.put_u8(FIN_BIT | opcode as u8);
    if len < 126 {
        frame.put_u8(len as u8);
    } else if len <= u64::from(u16::MAX) {
        frame.put_u8(126);
        frame.put_u16(len as u16);
    } else {
        frame.put_u8(127);
        frame.put_u64(len);
    }
    frame.extend_from_slice(payload);
    conn.write_all_retry(&frame)
}

// ─── NDT-over-WebSocket ─────────────────────────────────────────────────────

/// Receive one NDT control message tunneled as a WebSocket message: the
/// first three reassembled bytes are the NDT header, the rest its payload.
/// Trailing slack beyond the declared length is tolerated and dropped.
pub fn recv_ndt_message<S: Read + Write>(
    conn: &mut Connection<S>,
    max_payload: usize,
) -> Result<Message, Error> {
    let raw = recv_message(conn, max_payload.saturating_add(MSG_HEADER_LEN))?;
    if raw.len() < MSG_HEADER_LEN {
        return Err(Error::BadMessage);
    }
    let (kind, declared) = wire::decode_header(&[raw[0], raw[1], raw[2]]);
    let declared = declared as usize;
    if declared > raw.len() - MSG_HEADER_LEN {
        return Err(Error::BadMessage);
    }
    Ok(Message {
        kind,
        payload: raw[MSG_HEADER_LEN..MSG_HEADER_LEN + declared].to_vec(),
    })
}

/// Send one NDT control message as a single Binary frame.
pub fn send_ndt_message<S: Read + Write>(
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
    let total = payload
        .len()
        .checked_add(MSG_HEADER_LEN)
        .ok_or(Error::Overflow)?;
    let mut msg = BytesMut::with_capacity(total);
    msg.extend_from_slice(&wire::encode_header(kind, payload.len() as u16));
    msg.extend_from_slice(payload);
    send_frame(conn, Opcode::Binary, &msg)
}
