//! NDT Control Server
//!
//! Thin daemon around the protocol engine:
//!
//! - Accepts control connections and gives each its own thread
//! - Applies the operator-configured read deadline to every socket
//! - Runs login negotiation (transport sniff, kickoff, suite building)
//! - Announces the negotiated suite, then hands the connection to a test
//!   executor
//!
//! The bundled executor only acknowledges the suite and logs the client
//! out; the throughput tests themselves plug in behind [`TestExecutor`].

use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ndt_session::login::{self, SessionCapabilities, TestSuite};
use ndt_transport::wire::SRV_QUEUE_TEST_STARTS_NOW;
use ndt_transport::{Connection, ControlChannel, MessageKind, Wrap};

/// NDT control-protocol server.
#[derive(Parser, Debug)]
#[command(name = "ndt-server", about = "NDT control-protocol server")]
struct Cli {
    /// Listen address for control connections.
    #[arg(long, default_value = "0.0.0.0:3001")]
    listen: String,

    /// Seconds a silent client may stall a control-channel read.
    #[arg(long, default_value_t = 600)]
    control_timeout: u64,
}

/// Receives a negotiated session and drives the PREPARE/START/DATA/FINALIZE
/// phases of each test. Implementations own the connection's I/O for the
/// duration of the call.
trait TestExecutor {
    fn run(
        &mut self,
        chan: &mut ControlChannel<TcpStream>,
        caps: &SessionCapabilities,
        suite: &TestSuite,
    ) -> anyhow::Result<()>;
}

/// Placeholder executor: no tests are driven, the client is logged out.
struct LogoutExecutor;

impl TestExecutor for LogoutExecutor {
    fn run(
        &mut self,
        chan: &mut ControlChannel<TcpStream>,
        caps: &SessionCapabilities,
        suite: &TestSuite,
    ) -> anyhow::Result<()> {
        tracing::info!(suite = %suite.wire_string(), "no test executor configured, logging client out");
        chan.send_wrapped(MessageKind::MSG_LOGOUT, "", caps.json_support, Wrap::Single)?;
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let listener = TcpListener::bind(&cli.listen)
        .with_context(|| format!("binding control listener on {}", cli.listen))?;
    tracing::info!(listen = %cli.listen, "ndt-server accepting control connections");

    let timeout = Duration::from_secs(cli.control_timeout);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                thread::spawn(move || serve_client(stream, timeout));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
    Ok(())
}

/// One control session, start to finish.
fn serve_client(stream: TcpStream, timeout: Duration) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    if let Err(e) = stream.set_read_timeout(Some(timeout)) {
        tracing::warn!(peer = %peer, error = %e, "could not arm control-read deadline");
        return;
    }
    tracing::debug!(peer = %peer, "control connection accepted");

    let mut chan = ControlChannel::new(Connection::new(stream));
    let (caps, suite) = match login::negotiate(&mut chan) {
        Ok(negotiated) => negotiated,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "login failed");
            return;
        }
    };

    if let Err(e) = run_session(&mut chan, &caps, &suite) {
        tracing::warn!(peer = %peer, error = %e, "session aborted");
    }
}

/// Announce the suite and hand the session to the executor, mirroring the
/// wire sequence clients expect: queue status, server version, suite.
fn run_session(
    chan: &mut ControlChannel<TcpStream>,
    caps: &SessionCapabilities,
    suite: &TestSuite,
) -> anyhow::Result<()> {
    // Single-session server: no queue, tests start now.
    chan.send_wrapped(
        MessageKind::SRV_QUEUE,
        &SRV_QUEUE_TEST_STARTS_NOW.to_string(),
        caps.json_support,
        Wrap::Single,
    )?;
    chan.send_wrapped(
        MessageKind::MSG_LOGIN,
        concat!("v", env!("CARGO_PKG_VERSION")),
        caps.json_support,
        Wrap::Single,
    )?;
    chan.send_wrapped(
        MessageKind::MSG_LOGIN,
        &suite.wire_string(),
        caps.json_support,
        Wrap::Single,
    )?;

    LogoutExecutor.run(chan, caps, suite)
}
