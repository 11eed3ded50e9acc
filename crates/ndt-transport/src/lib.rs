//! # ndt-transport
//!
//! Control-protocol framing for the NDT diagnostic engine.
//!
//! Three nested wire formats compose here: the fixed 3-byte NDT message
//! envelope, the optional JSON payload envelope negotiated at login, and
//! the RFC 6455 WebSocket sublayer that tunnels whole control messages for
//! browser clients. Everything is pure protocol logic over `Read + Write`
//! streams — listening, scheduling, and test execution live elsewhere.
//!
//! ## Crate structure
//!
//! - [`connection`] — exclusive stream handle, checked read primitives,
//!   bounded write retries
//! - [`wire`] — NDT message header codec and kind numbering
//! - [`envelope`] — JSON payload envelope shapes
//! - [`websocket`] — RFC 6455 handshake, framer, NDT-over-WebSocket
//! - [`channel`] — unified send/recv facade over the negotiated framing

pub mod channel;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod websocket;
pub mod wire;

#[cfg(test)]
pub(crate) mod testutil;

pub use channel::{ControlChannel, Wrap};
pub use connection::Connection;
pub use error::Error;
pub use wire::{Message, MessageKind};
