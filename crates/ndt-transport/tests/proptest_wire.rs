//! Property-based tests for the NDT control framing.
//!
//! These verify roundtrip correctness of the message codec and JSON
//! envelope across the full value range, and that the WebSocket framer's
//! unmasking and length validation hold for arbitrary payloads and keys.

use std::io::{self, Read, Write};

use proptest::prelude::*;

use ndt_transport::envelope::{decode_key, encode_single, DEFAULT_KEY};
use ndt_transport::error::Error;
use ndt_transport::websocket;
use ndt_transport::wire;
use ndt_transport::{Connection, MessageKind};

// ─── Scripted Stream ─────────────────────────────────────────────────────────

/// Minimal in-memory stream: scripted input, captured output.
struct Loopback {
    input: io::Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl Loopback {
    fn new(input: Vec<u8>) -> Self {
        Loopback {
            input: io::Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Build a masked single-frame client message.
fn masked_frame(opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut frame = vec![0x80 | opcode];
    match payload.len() {
        n if n < 126 => frame.push(0x80 | n as u8),
        n if n <= u16::MAX as usize => {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

// ─── Message Codec Roundtrip ────────────────────────────────────────────────

proptest! {
    #[test]
    fn wire_roundtrip(kind in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let mut conn = Connection::new(Loopback::new(vec![]));
        wire::send(&mut conn, MessageKind(kind), &payload).unwrap();
        let sent = conn.into_inner().output;

        let mut conn = Connection::new(Loopback::new(sent));
        let msg = wire::recv(&mut conn, payload.len()).unwrap();
        prop_assert_eq!(msg.kind.as_u8(), kind);
        prop_assert_eq!(msg.payload, payload);
    }

    #[test]
    fn envelope_roundtrip(value in "\\PC*") {
        let json = encode_single(&value);
        prop_assert_eq!(decode_key(&json, DEFAULT_KEY), Some(value));
    }

    #[test]
    fn websocket_unmask_recovers_payload(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        mask in any::<[u8; 4]>(),
    ) {
        let frame = masked_frame(0x2, &payload, mask);
        let mut conn = Connection::new(Loopback::new(frame));
        let got = websocket::recv_message(&mut conn, payload.len().max(1)).unwrap();
        prop_assert_eq!(got, payload);
    }

    #[test]
    fn websocket_hostile_lengths_rejected_before_read(
        claimed in (1u64 << 32)..,
        max_len in 0usize..4096,
    ) {
        // 8-byte length field claiming `claimed` bytes; none follow.
        let mut bytes = vec![0x80 | 0x2, 0x80 | 127];
        bytes.extend_from_slice(&claimed.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let mut conn = Connection::new(Loopback::new(bytes));
        match websocket::recv_message(&mut conn, max_len) {
            Err(Error::MessageTooLarge { .. }) | Err(Error::Overflow) => {}
            other => prop_assert!(false, "expected length rejection, got {:?}", other),
        }
    }
}

// ─── Boundary Cases ─────────────────────────────────────────────────────────

#[test]
fn wire_roundtrip_at_maximum_length() {
    let payload = vec![0x5A; wire::MAX_PAYLOAD_LEN];
    let mut conn = Connection::new(Loopback::new(vec![]));
    wire::send(&mut conn, MessageKind::TEST_MSG, &payload).unwrap();
    let sent = conn.into_inner().output;
    assert_eq!(sent.len(), wire::MSG_HEADER_LEN + wire::MAX_PAYLOAD_LEN);

    let mut conn = Connection::new(Loopback::new(sent));
    let msg = wire::recv(&mut conn, wire::MAX_PAYLOAD_LEN).unwrap();
    assert_eq!(msg.payload.len(), wire::MAX_PAYLOAD_LEN);
}
