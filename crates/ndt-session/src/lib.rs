//! # ndt-session
//!
//! Session negotiation for the NDT diagnostic engine: the login state
//! machine that detects transport and dialect and derives the ordered test
//! suite, and the periodic snapshot worker throughput tests run beside
//! their data loops.
//!
//! ## Crate structure
//!
//! - [`login`] — transport sniff, kickoff, login parsing, suite building
//! - [`snap`] — stats-backend seam and the start/stop sampler

pub mod login;
pub mod snap;

pub use login::{LoginError, SessionCapabilities, TestId, TestSuite};
pub use snap::{SnapResults, SnapWorker, StatsBackend};
