//! The downstream half of the bridge: an LMTP client on a Unix socket.

#[allow(clippy::module_inception)]
mod client;
mod response;

use std::path::PathBuf;

use async_trait::async_trait;

pub use self::{
    client::LmtpClient,
    response::{Response, ResponseLine},
};
use crate::{
    config::{ClientTimeouts, Config},
    error::ForwardError,
    internal,
    traits::{Forwarder, ForwarderFactory},
};

/// Opens one downstream connection per inbound session.
#[derive(Debug, Clone)]
pub struct LmtpForwarderFactory {
    path: PathBuf,
    hostname: String,
    timeouts: ClientTimeouts,
}

impl LmtpForwarderFactory {
    #[must_use]
    pub const fn new(path: PathBuf, hostname: String, timeouts: ClientTimeouts) -> Self {
        Self {
            path,
            hostname,
            timeouts,
        }
    }
}

impl From<&Config> for LmtpForwarderFactory {
    fn from(config: &Config) -> Self {
        Self::new(
            config.forward.clone(),
            config.hostname.clone(),
            config.timeouts.client.clone(),
        )
    }
}

#[async_trait]
impl ForwarderFactory for LmtpForwarderFactory {
    async fn connect(&self) -> Result<Box<dyn Forwarder>, ForwardError> {
        internal!(
            level = DEBUG,
            "Connecting to downstream LMTP server at {}",
            self.path.display()
        );

        let client = LmtpClient::connect(&self.path, &self.hostname, self.timeouts.clone()).await?;
        Ok(Box::new(client))
    }
}
