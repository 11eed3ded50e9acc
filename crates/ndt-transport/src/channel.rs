//! # Control Channel
//!
//! One send/receive surface for the rest of the engine. A channel starts in
//! raw framing and is switched to WebSocket tunneling when transport
//! detection completes an upgrade; after that every control message rides
//! in exactly one Binary frame. Callers never branch on the transport —
//! they hand the channel a kind and payload and the channel picks the
//! framing, applies the JSON envelope when asked, and feeds the audit seam.

use std::io::{Read, Write};

use crate::connection::Connection;
use crate::envelope;
use crate::error::Error;
use crate::websocket;
use crate::wire::{self, AuditSink, Message, MessageKind};

// ─── Envelope Shape Selection ───────────────────────────────────────────────

/// Which JSON envelope shape a wrapped send uses.
pub enum Wrap<'a> {
    /// `{"msg": text}`.
    Single,
    /// Flat map zipping `keys` against the message text.
    Multi {
        keys: &'a str,
        key_delims: &'a str,
        value_delims: &'a str,
    },
    /// Flat map parsed from `key: value` lines in the message text.
    Pairs,
}

// ─── Control Channel ────────────────────────────────────────────────────────

/// A control connection plus its negotiated framing.
pub struct ControlChannel<S> {
    conn: Connection<S>,
    websocket: bool,
    audit: Option<Box<dyn AuditSink>>,
}

impl<S: Read + Write> ControlChannel<S> {
    pub fn new(conn: Connection<S>) -> Self {
        ControlChannel {
            conn,
            websocket: false,
            audit: None,
        }
    }

    /// Install the protocol-audit collaborator. Every message that
    /// successfully crosses the channel is reported to it with raw bytes.
    pub fn set_audit(&mut self, sink: Box<dyn AuditSink>) {
        self.audit = Some(sink);
    }

    /// Complete a WebSocket upgrade whose first bytes were already sniffed,
    /// and switch all subsequent traffic to frame tunneling.
    pub fn upgrade_to_websocket(
        &mut self,
        already_consumed: &[u8],
        subprotocol: Option<&str>,
    ) -> Result<(), Error> {
        websocket::upgrade(&mut self.conn, already_consumed, subprotocol)?;
        self.websocket = true;
        Ok(())
    }

    pub fn is_websocket(&self) -> bool {
        self.websocket
    }

    pub fn is_secured(&self) -> bool {
        self.conn.is_secured()
    }

    pub fn connection_mut(&mut self) -> &mut Connection<S> {
        &mut self.conn
    }

    /// Hand the connection (and exclusive I/O rights) to the test executor.
    pub fn into_connection(self) -> Connection<S> {
        self.conn
    }

    /// Send one control message through the negotiated framing.
    pub fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<(), Error> {
        if self.websocket {
            websocket::send_ndt_message(&mut self.conn, kind, payload)?;
        } else {
            wire::send(&mut self.conn, kind, payload)?;
        }
        if let Some(audit) = self.audit.as_mut() {
            audit.on_send(kind, payload);
        }
        Ok(())
    }

    /// Receive one control message, bounding the payload at `max_payload`.
    pub fn recv(&mut self, max_payload: usize) -> Result<Message, Error> {
        let msg = if self.websocket {
            websocket::recv_ndt_message(&mut self.conn, max_payload)?
        } else {
            wire::recv(&mut self.conn, max_payload)?
        };
        if let Some(audit) = self.audit.as_mut() {
            audit.on_recv(msg.kind, &msg.payload);
        }
        Ok(msg)
    }

    /// Send a text payload, JSON-wrapped in the requested shape when the
    /// session negotiated JSON support, raw otherwise.
    pub fn send_wrapped(
        &mut self,
        kind: MessageKind,
        text: &str,
        json_support: bool,
        wrap: Wrap<'_>,
    ) -> Result<(), Error> {
        if !json_support {
            return self.send(kind, text.as_bytes());
        }
        let wrapped = match wrap {
            Wrap::Single => envelope::encode_single(text),
            Wrap::Multi {
                keys,
                key_delims,
                value_delims,
            } => envelope::encode_multi(keys, key_delims, text, value_delims),
            Wrap::Pairs => envelope::encode_pairs(text),
        };
        self.send(kind, wrapped.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DEFAULT_KEY;
    use crate::testutil::MockStream;
    use std::sync::{Arc, Mutex};

    #[test]
    fn raw_channel_roundtrip() {
        let mut chan = ControlChannel::new(Connection::new(MockStream::new(vec![])));
        chan.send(MessageKind::TEST_MSG, b"payload").unwrap();
        let sent = chan.into_connection().into_inner().output;

        let mut chan = ControlChannel::new(Connection::new(MockStream::new(sent)));
        let msg = chan.recv(64).unwrap();
        assert_eq!(msg.kind, MessageKind::TEST_MSG);
        assert_eq!(msg.payload, b"payload");
    }

    #[test]
    fn upgraded_channel_reads_tunneled_messages() {
        // Upgrade request (first 3 bytes sniffed off), then one masked
        // Binary frame carrying MSG_LOGIN with bitmask 0x30.
        let mask = [9u8, 8, 7, 6];
        let inner = [2u8, 0, 1, 0x30];
        let mut input = b" /ndt_protocol HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Protocol: ndt\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n"
            .to_vec();
        input.extend_from_slice(&[0x82, 0x80 | inner.len() as u8]);
        input.extend_from_slice(&mask);
        input.extend(inner.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));

        let mut chan = ControlChannel::new(Connection::new(MockStream::new(input)));
        chan.upgrade_to_websocket(b"GET", Some("ndt")).unwrap();
        assert!(chan.is_websocket());
        let msg = chan.recv(64).unwrap();
        assert_eq!(msg.kind, MessageKind::MSG_LOGIN);
        assert_eq!(msg.payload, vec![0x30]);
    }

    #[test]
    fn wrapped_send_encodes_json_only_when_negotiated() {
        let mut chan = ControlChannel::new(Connection::new(MockStream::new(vec![])));
        chan.send_wrapped(MessageKind::MSG_ERROR, "oops", true, Wrap::Single)
            .unwrap();
        let json_out = chan.into_connection().into_inner().output;
        let payload = String::from_utf8(json_out[3..].to_vec()).unwrap();
        assert_eq!(
            envelope::decode_key(&payload, DEFAULT_KEY),
            Some("oops".to_string())
        );

        let mut chan = ControlChannel::new(Connection::new(MockStream::new(vec![])));
        chan.send_wrapped(MessageKind::MSG_ERROR, "oops", false, Wrap::Single)
            .unwrap();
        let raw_out = chan.into_connection().into_inner().output;
        assert_eq!(&raw_out[3..], b"oops");
    }

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<(u8, Vec<u8>, bool)>>>,
    }

    impl AuditSink for Recorder {
        fn on_send(&mut self, kind: MessageKind, payload: &[u8]) {
            self.events
                .lock()
                .unwrap()
                .push((kind.as_u8(), payload.to_vec(), true));
        }
        fn on_recv(&mut self, kind: MessageKind, payload: &[u8]) {
            self.events
                .lock()
                .unwrap()
                .push((kind.as_u8(), payload.to_vec(), false));
        }
    }

    #[test]
    fn audit_sees_raw_bytes_in_both_directions() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut chan = ControlChannel::new(Connection::new(MockStream::new(vec![])));
        chan.set_audit(Box::new(Recorder {
            events: events.clone(),
        }));
        chan.send(MessageKind::TEST_START, b"go").unwrap();
        let sent = chan.into_connection().into_inner().output;

        let mut chan = ControlChannel::new(Connection::new(MockStream::new(sent)));
        chan.set_audit(Box::new(Recorder {
            events: events.clone(),
        }));
        chan.recv(16).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (4, b"go".to_vec(), true));
        assert_eq!(events[1], (4, b"go".to_vec(), false));
    }
}
