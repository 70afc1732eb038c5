//! One mail transaction state machine per inbound connection.
//!
//! The session resolves each recipient's local part, proxies the rewritten
//! envelope to its forwarder, and on `DATA` copies the body downstream and
//! relays every recipient's status back under the address the client used.

mod recipients;
mod status;

use std::{convert::Infallible, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
    time::{timeout_at, Instant},
};

pub use self::{
    recipients::RecipientMap,
    status::{StatusCollector, StatusEvent, StatusSender},
};
use crate::{
    error::{SessionError, SessionResult},
    internal,
    lmtp::command::MailParameters,
    traits::{DataSink, Forwarder, Resolver},
};

const COPY_BUFFER_SIZE: usize = 8192;

/// Where a session is in its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No sender yet.
    Init,
    /// A sender is set, but no recipient has been accepted.
    TransactionOpen,
    /// At least one recipient accepted, awaiting the body.
    DataPending,
}

pub struct Session {
    id: u64,
    resolver: Arc<dyn Resolver>,
    forwarder: Box<dyn Forwarder>,
    sender: Option<String>,
    unresolved: RecipientMap,
    status_wait: Duration,
}

impl Session {
    #[must_use]
    pub fn new(
        id: u64,
        resolver: Arc<dyn Resolver>,
        forwarder: Box<dyn Forwarder>,
        status_wait: Duration,
    ) -> Self {
        Self {
            id,
            resolver,
            forwarder,
            sender: None,
            unresolved: RecipientMap::new(),
            status_wait,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Accepted recipients, as the client wrote them, in acceptance order.
    #[must_use]
    pub fn recipients(&self) -> Vec<String> {
        self.unresolved.originals()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match (&self.sender, self.unresolved.is_empty()) {
            (None, _) => Phase::Init,
            (Some(_), true) => Phase::TransactionOpen,
            (Some(_), false) => Phase::DataPending,
        }
    }

    /// Start a transaction. The sender is forwarded verbatim.
    ///
    /// # Errors
    ///
    /// Returns the forwarder's error unchanged.
    pub async fn mail(&mut self, from: &str, params: &MailParameters) -> SessionResult<()> {
        internal!(level = DEBUG, session = self.id, "MAIL FROM:<{from}>");

        self.forwarder.mail(from, params).await?;
        self.sender = Some(from.to_string());

        Ok(())
    }

    /// Resolve `to` and add the result as a downstream recipient.
    ///
    /// # Errors
    ///
    /// Every error only rejects this recipient: a malformed address, a
    /// failed resolution, a resolved address already used by another
    /// recipient, or a downstream rejection.
    pub async fn rcpt(&mut self, to: &str) -> SessionResult<()> {
        let identifier = identifier(to)?;

        let resolved = self
            .resolver
            .resolve(identifier)
            .await
            .map_err(|source| {
                internal!(
                    level = INFO,
                    session = self.id,
                    "Unable to resolve {identifier}: {source}"
                );
                SessionError::Resolution {
                    identifier: identifier.to_string(),
                    source,
                }
            })?;

        if let Some(existing) = self.unresolved.original(&resolved) {
            internal!(
                level = INFO,
                session = self.id,
                "{to} resolves to {resolved}, already used by {existing}"
            );
            return Err(SessionError::ResolvedCollision {
                recipient: to.to_string(),
                resolved,
            });
        }

        internal!(level = DEBUG, session = self.id, "Resolved {to} to {resolved}");

        self.forwarder.rcpt(&resolved).await?;
        self.unresolved.insert(resolved, to.to_string());

        Ok(())
    }

    /// Copy the body from `reader` downstream, then wait for every accepted
    /// recipient's status and hand it to `statuses`.
    ///
    /// The transaction is over once this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`SessionError::DataCopy`] if the body could not be copied. No
    ///   statuses are collected.
    /// - [`SessionError::StatusTimeout`] naming every recipient whose
    ///   status did not arrive within the status wait.
    /// - [`SessionError::Delivery`] if any recipient failed, after all
    ///   statuses were reported.
    /// - [`SessionError::Forward`] if the forwarder refused the body. The
    ///   downstream transaction is reset.
    pub async fn data<R, C>(&mut self, mut reader: R, statuses: &mut C) -> SessionResult<()>
    where
        R: AsyncRead + Unpin + Send,
        C: StatusCollector + ?Sized,
    {
        if self.unresolved.is_empty() {
            return Err(SessionError::NoRecipients);
        }

        let result = self.transfer(&mut reader, statuses).await;
        self.clear_transaction();

        if let Err(err) = &result {
            internal!(level = INFO, session = self.id, "Transaction failed: {err}");

            // The downstream transaction may still be open.
            if matches!(err, SessionError::Forward(_)) {
                if let Err(reset) = self.forwarder.reset().await {
                    internal!(
                        level = WARN,
                        session = self.id,
                        "Downstream reset after failed transaction failed: {reset}"
                    );
                }
            }
        }

        result
    }

    async fn transfer<R, C>(&mut self, reader: &mut R, statuses: &mut C) -> SessionResult<()>
    where
        R: AsyncRead + Unpin + Send,
        C: StatusCollector + ?Sized,
    {
        let (sender, mut receiver) = StatusSender::channel(self.unresolved.len());
        let mut sink = self.forwarder.data(sender).await?;

        // On failure the sink is dropped unclosed, abandoning the transfer.
        let copied = copy_body(reader, sink.as_mut())
            .await
            .map_err(SessionError::DataCopy)?;

        // Closing reads the downstream replies, so it shares the status wait.
        // A close cut short drops the sink unfinished, which breaks the forwarder.
        let deadline = Instant::now() + self.status_wait;
        match timeout_at(deadline, sink.close()).await {
            Ok(closed) => closed?,
            Err(_) => internal!(
                level = WARN,
                session = self.id,
                "Forwarder did not finish the transfer within the status wait"
            ),
        }

        internal!(
            level = DEBUG,
            session = self.id,
            "Forwarded {copied} bytes, awaiting {} statuses",
            self.unresolved.len()
        );

        self.collect(&mut receiver, statuses, deadline).await
    }

    async fn collect<C>(
        &mut self,
        receiver: &mut mpsc::Receiver<StatusEvent>,
        statuses: &mut C,
        deadline: Instant,
    ) -> SessionResult<()>
    where
        C: StatusCollector + ?Sized,
    {
        let mut failed = Vec::new();

        while !self.unresolved.is_empty() {
            let event = match timeout_at(deadline, receiver.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    internal!(
                        level = WARN,
                        session = self.id,
                        "Forwarder stopped reporting with {} statuses outstanding",
                        self.unresolved.len()
                    );
                    break;
                }
                Err(_) => break,
            };

            let Some(original) = self.unresolved.remove(&event.recipient) else {
                internal!(
                    level = WARN,
                    session = self.id,
                    "Ignoring status for unexpected recipient {}",
                    event.recipient
                );
                continue;
            };

            match &event.result {
                Ok(()) => internal!(level = INFO, session = self.id, "Delivered to {original}"),
                Err(err) => {
                    internal!(level = INFO, session = self.id, "Delivery to {original} failed: {err}");
                    failed.push(original.clone());
                }
            }

            statuses.set_status(&original, event.result);
        }

        if !self.unresolved.is_empty() {
            return Err(SessionError::StatusTimeout {
                missing: self.unresolved.originals(),
            });
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Delivery { failed })
        }
    }

    /// Abort the current transaction, here and downstream.
    ///
    /// # Errors
    ///
    /// Returns the forwarder's error. Local state is discarded regardless.
    pub async fn reset(&mut self) -> SessionResult<()> {
        internal!(level = DEBUG, session = self.id, "Resetting transaction");

        self.clear_transaction();
        self.forwarder.reset().await?;

        Ok(())
    }

    /// End the session, closing the forwarder.
    ///
    /// # Errors
    ///
    /// Returns the forwarder's error from closing.
    pub async fn logout(mut self) -> SessionResult<()> {
        internal!(level = DEBUG, session = self.id, "Logging out");

        self.clear_transaction();
        self.forwarder.close().await?;

        Ok(())
    }

    /// Inbound authentication is not supported.
    ///
    /// # Errors
    ///
    /// Always fails with [`SessionError::AuthUnsupported`].
    pub fn auth_plain(&self, _initial_response: Option<&str>) -> SessionResult<Infallible> {
        internal!(level = DEBUG, session = self.id, "Rejecting authentication attempt");
        Err(SessionError::AuthUnsupported)
    }

    fn clear_transaction(&mut self) {
        self.sender = None;
        self.unresolved.clear();
    }
}

/// The part of `address` before its final `@`.
fn identifier(address: &str) -> SessionResult<&str> {
    address
        .rfind('@')
        .filter(|&at| at > 0)
        .map(|at| &address[..at])
        .ok_or_else(|| SessionError::InvalidAddress(address.to_string()))
}

async fn copy_body<R>(reader: &mut R, sink: &mut (dyn DataSink + '_)) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buffer = vec![0; COPY_BUFFER_SIZE];
    let mut copied = 0;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            return Ok(copied);
        }

        sink.write(&buffer[..read]).await?;
        copied += read as u64;
    }
}
