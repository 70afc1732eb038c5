//! Error types for the bridge.
//!
//! Each concern gets its own enum: configuration, the listener loop, the
//! inbound connection, the downstream client, resolution, forwarding and the
//! session itself. `SessionError` is the only one the LMTP engine turns into
//! replies for the inbound peer.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::status::{EnhancedCode, Reply, Status};

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("No configuration file found (searched: {searched})")]
    NotFound { searched: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid listen address '{0}'")]
    ListenAddress(String),
}

/// Errors from the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bridge only serves local (Unix domain) sockets.
    #[error("Unsupported listener transport '{0}', expected a unix socket")]
    UnsupportedTransport(String),

    #[error("Unable to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("Server has already been closed")]
    Closed,
}

/// Errors on the inbound LMTP connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Errors from the downstream LMTP client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unable to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Connection closed by server")]
    Closed,

    #[error("Malformed response: {0}")]
    Parse(String),

    #[error("Unexpected response to {command}: {reply}")]
    UnexpectedResponse { command: &'static str, reply: Reply },

    /// A previous operation left the connection in an unknown state.
    #[error("Connection is no longer usable")]
    Broken,
}

/// A resolver could not map an identifier to a forwarding address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("No forwarding address for '{0}'")]
    NotFound(String),

    #[error("Resolution failed: {0}")]
    Failed(String),
}

/// Errors reported by a `Forwarder`, either directly or as the result of a
/// per-recipient status event.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The downstream server answered with a negative reply.
    #[error("Rejected by downstream: {0}")]
    Rejected(Reply),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Forwarder unavailable: {0}")]
    Unavailable(String),
}

impl ForwardError {
    /// The reply to relay to the inbound peer for this failure.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        match self {
            Self::Rejected(reply) => reply.clone(),
            Self::Client(ClientError::Timeout(_)) => Reply::new(
                Status::ActionUnavailable,
                EnhancedCode::TIMEOUT,
                "Downstream timed out",
            ),
            Self::Client(_) | Self::Unavailable(_) => Reply::new(
                Status::ActionUnavailable,
                EnhancedCode::TEMPORARY_NETWORK,
                "Downstream unavailable",
            ),
        }
    }
}

/// Errors returned by `Session` operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid recipient address '{0}'")]
    InvalidAddress(String),

    #[error("Unable to resolve '{identifier}': {source}")]
    Resolution {
        identifier: String,
        #[source]
        source: ResolveError,
    },

    #[error("Recipient '{recipient}' resolves to '{resolved}', which is already a recipient")]
    ResolvedCollision { recipient: String, resolved: String },

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("No recipients have been accepted")]
    NoRecipients,

    #[error("Failed to copy message data: {0}")]
    DataCopy(#[source] io::Error),

    #[error("timeout waiting for forward LMTP status: {}", .missing.join(", "))]
    StatusTimeout { missing: Vec<String> },

    #[error("Delivery failed for: {}", .failed.join(", "))]
    Delivery { failed: Vec<String> },

    #[error("Authentication is not supported")]
    AuthUnsupported,
}

impl SessionError {
    /// Errors that abort the whole transaction rather than a single command.
    #[must_use]
    pub const fn is_transaction_fatal(&self) -> bool {
        matches!(
            self,
            Self::DataCopy(_) | Self::StatusTimeout { .. } | Self::Delivery { .. }
        )
    }

    /// Errors that only reject the recipient that caused them.
    #[must_use]
    pub const fn is_recipient_scoped(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress(_) | Self::Resolution { .. } | Self::ResolvedCollision { .. }
        )
    }

    #[must_use]
    pub fn to_reply(&self) -> Reply {
        match self {
            Self::InvalidAddress(_) => Reply::new(
                Status::ParameterError,
                EnhancedCode::BAD_DESTINATION_SYNTAX,
                "Invalid recipient address",
            ),
            Self::Resolution {
                source: ResolveError::NotFound(_),
                ..
            } => Reply::new(
                Status::Error,
                EnhancedCode::BAD_DESTINATION,
                "No such user here",
            ),
            Self::Resolution { .. } => Reply::new(
                Status::ActionUnavailable,
                EnhancedCode::TEMPORARY_DESTINATION,
                "Unable to resolve recipient",
            ),
            Self::ResolvedCollision { .. } => Reply::new(
                Status::Error,
                EnhancedCode::BAD_DESTINATION_SYNTAX,
                "Recipient duplicates another recipient",
            ),
            Self::Forward(err) => err.to_reply(),
            Self::NoRecipients => Reply::new(
                Status::InvalidCommandSequence,
                EnhancedCode::INVALID_COMMAND,
                "No valid recipients",
            ),
            Self::DataCopy(_) => Reply::new(
                Status::ActionUnavailable,
                EnhancedCode::TEMPORARY_SYSTEM,
                "Failed to transfer message",
            ),
            Self::StatusTimeout { .. } => Reply::new(
                Status::ActionUnavailable,
                EnhancedCode::TIMEOUT,
                "Timed out waiting for delivery status",
            ),
            Self::Delivery { .. } => Reply::new(
                Status::TransactionFailed,
                EnhancedCode(5, 0, 0),
                "Delivery failed",
            ),
            Self::AuthUnsupported => Reply::new(
                Status::NotImplemented,
                EnhancedCode::AUTH_UNSUPPORTED,
                "Authentication not supported",
            ),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;
pub type ClientResult<T> = std::result::Result<T, ClientError>;
pub type SessionResult<T> = std::result::Result<T, SessionError>;
