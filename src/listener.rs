use core::fmt::{self, Display, Formatter};
use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, UnixListener};

use crate::{
    error::{ConfigError, ServerError},
    internal,
};

/// An address to listen on, written `unix:/path/to.sock` or `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ListenAddress {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl FromStr for ListenAddress {
    type Err = ConfigError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        if let Some(path) = address.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ConfigError::ListenAddress(address.to_string()));
            }

            return Ok(Self::Unix(PathBuf::from(path)));
        }

        address
            .parse()
            .map(Self::Tcp)
            .map_err(|_| ConfigError::ListenAddress(address.to_string()))
    }
}

impl TryFrom<String> for ListenAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ListenAddress> for String {
    fn from(value: ListenAddress) -> Self {
        value.to_string()
    }
}

impl Display for ListenAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(address) => write!(f, "{address}"),
        }
    }
}

/// A bound listener, handed to `Server::serve`.
#[derive(Debug)]
pub enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    /// Bind `address`.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound, e.g. because the path already
    /// exists. Existing socket files are never removed.
    pub async fn bind(address: &ListenAddress) -> Result<Self, ServerError> {
        internal!(level = DEBUG, "Binding {address}");

        let bind_error = |source| ServerError::Bind {
            address: address.to_string(),
            source,
        };

        match address {
            ListenAddress::Unix(path) => UnixListener::bind(path).map(Self::Unix).map_err(bind_error),
            ListenAddress::Tcp(socket) => TcpListener::bind(socket)
                .await
                .map(Self::Tcp)
                .map_err(bind_error),
        }
    }

    /// The transport name used in logs and errors.
    #[must_use]
    pub const fn transport(&self) -> &'static str {
        match self {
            Self::Unix(_) => "unix",
            Self::Tcp(_) => "tcp",
        }
    }
}
