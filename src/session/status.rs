//! Per-recipient delivery statuses.
//!
//! Forwarders report through a [`StatusSender`], which only ever does a
//! non-blocking `try_send` onto a queue sized to the outstanding recipients.
//! The session drains the queue and hands each status, keyed by the
//! original recipient, to a [`StatusCollector`].

use tokio::sync::mpsc;

use crate::{error::ForwardError, internal};

/// The outcome for one recipient.
#[derive(Debug)]
pub struct StatusEvent {
    pub recipient: String,
    pub result: Result<(), ForwardError>,
}

impl StatusEvent {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Producer side of the status queue.
#[derive(Debug, Clone)]
pub struct StatusSender {
    sender: mpsc::Sender<StatusEvent>,
}

impl StatusSender {
    /// Create a queue with room for `outstanding` statuses.
    #[must_use]
    pub fn channel(outstanding: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (sender, receiver) = mpsc::channel(outstanding.max(1));
        (Self { sender }, receiver)
    }

    /// Report the status of `recipient`. Never blocks; returns `false` if
    /// the status could not be queued, either because nobody is waiting for
    /// it any more or because more statuses were sent than recipients exist.
    pub fn report(&self, recipient: impl Into<String>, result: Result<(), ForwardError>) -> bool {
        let event = StatusEvent {
            recipient: recipient.into(),
            result,
        };

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                internal!(
                    level = WARN,
                    "Status queue full, dropping status for {}",
                    event.recipient
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                internal!(
                    level = DEBUG,
                    "Status for {} arrived after the transaction finished",
                    event.recipient
                );
                false
            }
        }
    }
}

/// Receives each recipient's status as `Data` learns it.
pub trait StatusCollector: Send {
    /// `recipient` is the address originally given to `RCPT`.
    fn set_status(&mut self, recipient: &str, result: Result<(), ForwardError>);
}

impl StatusCollector for Vec<StatusEvent> {
    fn set_status(&mut self, recipient: &str, result: Result<(), ForwardError>) {
        self.push(StatusEvent {
            recipient: recipient.to_string(),
            result,
        });
    }
}
