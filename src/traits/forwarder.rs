//! The downstream side of a session.
//!
//! A [`ForwarderFactory`] hands out one [`Forwarder`] per accepted
//! connection. The session proxies the (rewritten) envelope to it and, on
//! `DATA`, streams the body into a [`DataSink`]. Every recipient the
//! forwarder accepted produces exactly one status on the `StatusSender`
//! passed to [`Forwarder::data`], possibly after [`DataSink::close`] returns.

use async_trait::async_trait;

use crate::{error::ForwardError, lmtp::command::MailParameters, session::StatusSender};

#[async_trait]
pub trait Forwarder: Send {
    /// Start a transaction with the given envelope sender.
    async fn mail(&mut self, from: &str, params: &MailParameters) -> Result<(), ForwardError>;

    /// Add an (already resolved) envelope recipient.
    async fn rcpt(&mut self, to: &str) -> Result<(), ForwardError>;

    /// Begin the body transfer. Statuses for each accepted recipient are
    /// reported on `statuses`.
    async fn data<'a>(
        &'a mut self,
        statuses: StatusSender,
    ) -> Result<Box<dyn DataSink + 'a>, ForwardError>;

    async fn reset(&mut self) -> Result<(), ForwardError>;

    /// End the downstream session.
    async fn close(&mut self) -> Result<(), ForwardError>;
}

/// Receives the message body.
///
/// Dropping a sink without calling [`DataSink::close`] abandons the
/// transfer.
#[async_trait]
pub trait DataSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()>;

    /// Finish the body. Any statuses not yet reported are still owed.
    async fn close(self: Box<Self>) -> Result<(), ForwardError>;
}

/// Creates a fresh [`Forwarder`] for each inbound connection.
#[async_trait]
pub trait ForwarderFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Forwarder>, ForwardError>;
}
