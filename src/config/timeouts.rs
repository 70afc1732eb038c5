//! Timeout configuration for both sides of the bridge.
//!
//! The server side bounds how long we wait on the inbound LMTP client. The
//! client side bounds each exchange with the downstream LMTP server, and the
//! status wait bounds how long a transaction waits for per-recipient results
//! once the body has been handed over.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Common interface for timeout configuration.
pub trait TimeoutConfig {
    /// Timeout for a single command exchange.
    fn command_timeout(&self) -> Duration;

    /// Timeout for the message body transfer.
    fn data_timeout(&self) -> Duration;

    /// Maximum connection duration.
    fn connection_timeout(&self) -> Duration;
}

/// Timeouts applied to the inbound LMTP session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Time allowed between commands.
    ///
    /// Default: 300 seconds (5 minutes)
    #[serde(default = "defaults::server_command_secs")]
    pub command_secs: u64,

    /// Time allowed to receive the whole message body.
    ///
    /// Default: 600 seconds (10 minutes)
    #[serde(default = "defaults::server_data_secs")]
    pub data_secs: u64,

    /// Maximum total connection duration.
    ///
    /// Default: 1800 seconds (30 minutes)
    #[serde(default = "defaults::server_connection_secs")]
    pub connection_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::server_command_secs(),
            data_secs: defaults::server_data_secs(),
            connection_secs: defaults::server_connection_secs(),
        }
    }
}

impl TimeoutConfig for ServerTimeouts {
    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }
}

/// Timeouts applied to the downstream LMTP connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for connecting to the downstream socket.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_connect_secs")]
    pub connect_secs: u64,

    /// Timeout for each envelope command (LHLO, MAIL, RCPT, RSET, QUIT).
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub command_secs: u64,

    /// Timeout for DATA and the message transfer.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::client_data_secs")]
    pub data_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::client_connect_secs(),
            command_secs: defaults::client_command_secs(),
            data_secs: defaults::client_data_secs(),
        }
    }
}

impl ClientTimeouts {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl TimeoutConfig for ClientTimeouts {
    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_secs + self.command_secs + self.data_secs)
    }
}

/// All timeouts, as found under `[timeouts]` in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default)]
    pub server: ServerTimeouts,

    #[serde(default)]
    pub client: ClientTimeouts,

    /// How long a transaction waits for every recipient's delivery status
    /// after the body was handed downstream. The budget covers the whole
    /// wait, not each status.
    ///
    /// Default: 5 seconds
    #[serde(default = "defaults::status_wait_secs")]
    pub status_wait_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            server: ServerTimeouts::default(),
            client: ClientTimeouts::default(),
            status_wait_secs: defaults::status_wait_secs(),
        }
    }
}

impl Timeouts {
    pub const fn status_wait(&self) -> Duration {
        Duration::from_secs(self.status_wait_secs)
    }
}

mod defaults {
    pub const fn server_command_secs() -> u64 {
        300 // 5 minutes
    }
    pub const fn server_data_secs() -> u64 {
        600 // 10 minutes
    }
    pub const fn server_connection_secs() -> u64 {
        1800 // 30 minutes
    }

    pub const fn client_connect_secs() -> u64 {
        30
    }
    pub const fn client_command_secs() -> u64 {
        30
    }
    pub const fn client_data_secs() -> u64 {
        120 // 2 minutes
    }

    pub const fn status_wait_secs() -> u64 {
        5
    }
}
