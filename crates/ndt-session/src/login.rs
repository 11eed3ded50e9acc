//! # Login Negotiation
//!
//! The state machine every control connection passes through exactly once
//! before any test runs:
//!
//! ```text
//!   AwaitFirstBytes ──"GET"──▶ WebSocketUpgrade ──┐
//!         │                                       ▼
//!         └────NDT header──▶ Kickoff ──▶ ParseCredentials ──▶ BuildSuite ──▶ Done
//!                                            │
//!                         InvalidLogin / InvalidSuite / ClientTimeout
//! ```
//!
//! The first three bytes decide the transport: an ASCII `GET` means a
//! browser is knocking and the WebSocket handshake takes over; anything
//! else is already an NDT message header. The login message then decides
//! the dialect: a legacy one-byte bitmask, or a JSON document carrying the
//! bitmask and client version. Both facts are frozen into
//! [`SessionCapabilities`] before the test executor ever sees the
//! connection.

use std::fmt;
use std::io::{Read, Write};

use ndt_transport::envelope::{decode_key, DEFAULT_KEY};
use ndt_transport::wire;
use ndt_transport::{ControlChannel, Error, MessageKind, Wrap};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Longest client-version string the extended login may carry.
pub const CS_VERSION_LENGTH_MAX: usize = 64;

/// Literal bytes that evict pre-protocol legacy clients, written before the
/// login is processed on every non-WebSocket connection.
pub const KICKOFF_MSG: &[u8; 13] = b"123456 654321";

/// Subprotocol token browser clients must offer.
pub const NDT_SUBPROTOCOL: &str = "ndt";

/// Ceiling on the login payload (the extended login's JSON document).
const LOGIN_MAX_PAYLOAD: usize = 512;

/// Key under which the extended login carries its test bitmask.
const TESTS_KEY: &str = "tests";

// ─── Test Flags ─────────────────────────────────────────────────────────────

/// Bitmask flags a client may request. STATUS is informational only and
/// never produces a runnable test; EXT upgrades the throughput tests to
/// their multi-stream variants.
pub const TEST_MID: u8 = 1 << 0;
pub const TEST_C2S: u8 = 1 << 1;
pub const TEST_S2C: u8 = 1 << 2;
pub const TEST_SFW: u8 = 1 << 3;
pub const TEST_STATUS: u8 = 1 << 4;
pub const TEST_META: u8 = 1 << 5;
pub const TEST_EXT: u8 = 1 << 6;

const ALL_TEST_FLAGS: u8 =
    TEST_MID | TEST_C2S | TEST_S2C | TEST_SFW | TEST_STATUS | TEST_META | TEST_EXT;

// ─── Test Identifiers ───────────────────────────────────────────────────────

/// One runnable test in a negotiated suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestId {
    /// Middlebox detection. Needs a server-initiated connection back to the
    /// client, so it is unavailable over WebSocket transports.
    Mid,
    /// Simple firewall probe. Same unsolicited-connection constraint as MID.
    Sfw,
    /// Client-to-server throughput.
    C2s,
    /// Multi-stream client-to-server throughput.
    C2sExt,
    /// Server-to-client throughput.
    S2c,
    /// Multi-stream server-to-client throughput.
    S2cExt,
    /// Client metadata collection.
    Meta,
}

impl TestId {
    /// Numeric identifier announced to the client in the suite string. The
    /// extended variants carry their base flag with the EXT bit.
    pub fn wire_id(self) -> u8 {
        match self {
            TestId::Mid => TEST_MID,
            TestId::Sfw => TEST_SFW,
            TestId::C2s => TEST_C2S,
            TestId::C2sExt => TEST_C2S | TEST_EXT,
            TestId::S2c => TEST_S2C,
            TestId::S2cExt => TEST_S2C | TEST_EXT,
            TestId::Meta => TEST_META,
        }
    }
}

// ─── Test Suite ─────────────────────────────────────────────────────────────

/// Ordered tests negotiated for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    tests: Vec<TestId>,
}

impl TestSuite {
    pub fn tests(&self) -> &[TestId] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Space-separated numeric ids, the form the server announces to the
    /// client right before testing starts.
    pub fn wire_string(&self) -> String {
        let ids: Vec<String> = self
            .tests
            .iter()
            .map(|t| t.wire_id().to_string())
            .collect();
        ids.join(" ")
    }
}

impl fmt::Display for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.tests)
    }
}

// ─── Session Capabilities ───────────────────────────────────────────────────

/// What the handshake learned about the peer. Set once, read-only
/// afterward; the test executor shares it by reference.
#[derive(Debug, Clone)]
pub struct SessionCapabilities {
    pub json_support: bool,
    pub websocket_support: bool,
    pub tls_support: bool,
    pub client_version: String,
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Terminal outcomes of a failed login.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The login message itself is wrong: bad kind, bad length, bad JSON.
    #[error("invalid login message: {0}")]
    InvalidLogin(&'static str),
    /// The bitmask named no known test flag.
    #[error("no valid test in the requested suite")]
    InvalidSuite,
    /// The peer went silent mid-handshake. Kept distinct so operators can
    /// tell dead clients from hostile ones.
    #[error("client timed out during login")]
    ClientTimeout,
    /// The legacy-client kickoff could not be delivered.
    #[error("could not deliver the legacy-client kickoff")]
    KickoffFailed(#[source] Error),
    /// Any other transport-layer failure.
    #[error(transparent)]
    Transport(Error),
}

impl From<Error> for LoginError {
    fn from(e: Error) -> Self {
        match e {
            Error::Timeout => LoginError::ClientTimeout,
            other => LoginError::Transport(other),
        }
    }
}

// ─── Negotiation ────────────────────────────────────────────────────────────

/// Run the login state machine on a fresh control connection.
///
/// On success the channel's framing is fully negotiated and the caller owns
/// a capability record plus the ordered suite to hand to the test executor.
/// On failure a best-effort MSG_ERROR has been sent to the peer; the error
/// returned is always the original failure, never the reporting failure.
pub fn negotiate<S: Read + Write>(
    chan: &mut ControlChannel<S>,
) -> Result<(SessionCapabilities, TestSuite), LoginError> {
    let msg = match read_login_message(chan) {
        Ok(msg) => msg,
        Err(e) => {
            report_failure(chan, false, &e);
            return Err(e);
        }
    };
    let login = match parse_login(&msg) {
        Ok(login) => login,
        Err(e) => {
            // An extended login already committed the peer to JSON framing.
            report_failure(chan, msg.kind == MessageKind::MSG_EXTENDED_LOGIN, &e);
            return Err(e);
        }
    };

    let caps = SessionCapabilities {
        json_support: login.json_support,
        websocket_support: chan.is_websocket(),
        tls_support: chan.is_secured(),
        client_version: login.client_version,
    };

    let suite = match build_suite(login.bitmask, caps.websocket_support) {
        Ok(suite) => suite,
        Err(e) => {
            report_failure(chan, caps.json_support, &e);
            return Err(e);
        }
    };

    tracing::info!(
        json = caps.json_support,
        websocket = caps.websocket_support,
        tls = caps.tls_support,
        client_version = %caps.client_version,
        suite = %suite.wire_string(),
        "login complete"
    );
    Ok((caps, suite))
}

struct Login {
    bitmask: u8,
    json_support: bool,
    client_version: String,
}

/// AwaitFirstBytes: sniff the transport and pull in the one login message.
fn read_login_message<S: Read + Write>(
    chan: &mut ControlChannel<S>,
) -> Result<ndt_transport::Message, LoginError> {
    let mut first = [0u8; wire::MSG_HEADER_LEN];
    chan.connection_mut().read_exact(&mut first)?;

    if &first == b"GET" {
        // A browser: finish the HTTP upgrade, then the login arrives framed.
        chan.upgrade_to_websocket(&first, Some(NDT_SUBPROTOCOL))?;
        return Ok(chan.recv(LOGIN_MAX_PAYLOAD)?);
    }

    // The sniffed bytes were an NDT header. Evict any pre-protocol legacy
    // client before the login is acted on.
    chan.connection_mut()
        .write_all_retry(KICKOFF_MSG)
        .map_err(LoginError::KickoffFailed)?;

    let (kind, len) = wire::decode_header(&first);
    if len as usize > LOGIN_MAX_PAYLOAD {
        return Err(LoginError::InvalidLogin("login payload too large"));
    }
    let mut payload = vec![0u8; len as usize];
    chan.connection_mut().read_exact(&mut payload)?;
    Ok(ndt_transport::Message { kind, payload })
}

/// ParseCredentials: exactly two login dialects are admissible.
fn parse_login(msg: &ndt_transport::Message) -> Result<Login, LoginError> {
    match msg.kind {
        MessageKind::MSG_LOGIN => {
            if msg.payload.len() != 1 {
                return Err(LoginError::InvalidLogin("legacy login must be one byte"));
            }
            Ok(Login {
                bitmask: msg.payload[0],
                json_support: false,
                client_version: String::new(),
            })
        }
        MessageKind::MSG_EXTENDED_LOGIN => {
            let doc = std::str::from_utf8(&msg.payload)
                .map_err(|_| LoginError::InvalidLogin("extended login is not UTF-8"))?;
            let tests = decode_key(doc, TESTS_KEY)
                .ok_or(LoginError::InvalidLogin("extended login lacks a tests key"))?;
            let bitmask: u8 = tests
                .trim()
                .parse()
                .map_err(|_| LoginError::InvalidLogin("tests key is not a bitmask"))?;
            let client_version = decode_key(doc, DEFAULT_KEY).unwrap_or_default();
            if client_version.len() > CS_VERSION_LENGTH_MAX {
                return Err(LoginError::InvalidLogin("client version too long"));
            }
            Ok(Login {
                bitmask,
                json_support: true,
                client_version,
            })
        }
        _ => Err(LoginError::InvalidLogin("unexpected message kind")),
    }
}

/// BuildSuite: fixed priority order, with the browser-incompatible tests
/// silently dropped on WebSocket transports.
fn build_suite(bitmask: u8, websocket: bool) -> Result<TestSuite, LoginError> {
    if bitmask & ALL_TEST_FLAGS == 0 {
        return Err(LoginError::InvalidSuite);
    }
    let extended = bitmask & TEST_EXT != 0;
    let mut tests = Vec::new();
    if bitmask & TEST_MID != 0 {
        if websocket {
            tracing::debug!("dropping MID test: websocket client cannot accept connections");
        } else {
            tests.push(TestId::Mid);
        }
    }
    if bitmask & TEST_SFW != 0 {
        if websocket {
            tracing::debug!("dropping SFW test: websocket client cannot accept connections");
        } else {
            tests.push(TestId::Sfw);
        }
    }
    if bitmask & TEST_C2S != 0 {
        tests.push(if extended { TestId::C2sExt } else { TestId::C2s });
    }
    if bitmask & TEST_S2C != 0 {
        tests.push(if extended { TestId::S2cExt } else { TestId::S2c });
    }
    if bitmask & TEST_META != 0 {
        tests.push(TestId::Meta);
    }
    Ok(TestSuite { tests })
}

/// Best-effort MSG_ERROR to the peer. A failure to report never masks the
/// failure being reported.
fn report_failure<S: Read + Write>(
    chan: &mut ControlChannel<S>,
    json_support: bool,
    error: &LoginError,
) {
    let text = match error {
        LoginError::InvalidSuite => "Invalid test suite request.",
        LoginError::InvalidLogin(_) => "Invalid login message.",
        // A silent or broken peer will not see a report; don't try.
        _ => return,
    };
    if let Err(e) = chan.send_wrapped(MessageKind::MSG_ERROR, text, json_support, Wrap::Single)
    {
        tracing::debug!(error = %e, "could not report login failure to peer");
    }
}
