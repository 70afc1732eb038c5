//! Command sequencing for the inbound LMTP session.
//!
//! The state only moves on commands the session accepted, so the input is
//! the outcome of a command rather than the command itself.

use crate::{lmtp::command::Command, traits::fsm::FiniteStateMachine};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    /// Greeting sent, waiting for LHLO.
    #[default]
    Connected,
    /// LHLO accepted, no transaction open.
    Ready,
    /// Sender accepted, no recipient yet.
    MailFrom,
    /// At least one recipient accepted.
    RcptTo,
    Closed,
}

/// An accepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Lhlo(String),
    Mail(String),
    Rcpt(String),
    DataComplete,
    Reset,
    Quit,
}

/// What the engine knows about the current client and transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub client: Option<String>,
    pub sender: Option<String>,
    /// Accepted recipients in RCPT order.
    pub recipients: Vec<String>,
}

impl Envelope {
    fn clear_transaction(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

impl State {
    /// Whether `command` may be issued now.
    #[must_use]
    pub const fn allows(self, command: &Command) -> bool {
        match command {
            Command::MailFrom(..) => matches!(self, Self::Ready),
            Command::RcptTo(..) => matches!(self, Self::MailFrom | Self::RcptTo),
            Command::Data => matches!(self, Self::RcptTo),
            _ => !matches!(self, Self::Closed),
        }
    }

    /// Whether a transaction is open.
    #[must_use]
    pub const fn in_transaction(self) -> bool {
        matches!(self, Self::MailFrom | Self::RcptTo)
    }
}

impl FiniteStateMachine for State {
    type Input = Event;
    type Context = Envelope;

    fn transition(self, input: Self::Input, context: &mut Self::Context) -> Self {
        match (self, input) {
            (Self::Closed, _) => Self::Closed,
            (_, Event::Quit) => Self::Closed,
            (_, Event::Lhlo(id)) => {
                context.client = Some(id);
                context.clear_transaction();
                Self::Ready
            }
            (Self::Ready, Event::Mail(sender)) => {
                context.sender = Some(sender);
                Self::MailFrom
            }
            (Self::MailFrom | Self::RcptTo, Event::Rcpt(recipient)) => {
                context.recipients.push(recipient);
                Self::RcptTo
            }
            (_, Event::DataComplete | Event::Reset) => {
                context.clear_transaction();
                if context.client.is_some() {
                    Self::Ready
                } else {
                    Self::Connected
                }
            }
            (state, _) => state,
        }
    }
}
