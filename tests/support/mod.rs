//! Test support utilities for end-to-end testing
//!
//! A mock downstream LMTP server and a harness that runs the bridge in front
//! of it on temporary Unix sockets.

pub mod harness;
pub mod mock_server;

pub use harness::{BridgeHarness, LmtpTestClient};
pub use mock_server::{LmtpCommand, MockLmtpServer};
