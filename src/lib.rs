#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod lmtp;
pub mod logging;
pub mod resolver;
pub mod server;
pub mod session;
pub mod status;
pub mod traits;

pub use tracing;
