//! The inbound LMTP protocol engine.
//!
//! One [`Lmtp`] serves one accepted connection: it parses commands, checks
//! their sequencing, drives the [`Session`] and turns its results into
//! replies. After `DATA` it sends one reply per accepted recipient, in the
//! order the recipients were given (RFC 2033 Section 4.2).

pub mod command;
pub mod connection;
pub mod state;

use std::{sync::Arc, time::Instant};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
    time::timeout,
};

use self::{
    command::Command,
    connection::{Body, Connection},
    state::{Envelope, Event, State},
};
use crate::{
    config::{Config, ServerTimeouts, TimeoutConfig},
    error::{ConnectionError, ConnectionResult, ForwardError, SessionError},
    incoming, internal,
    server::Signal,
    session::{Session, StatusCollector},
    status::{EnhancedCode, Reply, Status},
    traits::fsm::FiniteStateMachine,
};

/// Settings shared by every inbound session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmtpConfig {
    pub hostname: String,
    pub max_message_size: usize,
    pub timeouts: ServerTimeouts,
}

impl From<&Config> for LmtpConfig {
    fn from(config: &Config) -> Self {
        Self {
            hostname: config.hostname.clone(),
            max_message_size: config.max_message_size,
            timeouts: config.timeouts.server.clone(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

pub struct Lmtp<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    connection: Connection<Stream>,
    session: Session,
    config: Arc<LmtpConfig>,
    state: State,
    envelope: Envelope,
    started: Instant,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Lmtp<Stream> {
    pub fn new(stream: Stream, session: Session, config: Arc<LmtpConfig>) -> Self {
        Self {
            connection: Connection::new(stream),
            session,
            config,
            state: State::default(),
            envelope: Envelope::default(),
            started: Instant::now(),
        }
    }

    /// Serve the connection until the client quits, the connection drops,
    /// a timeout fires or `signal` asks us to shut down. The session is
    /// logged out in every case.
    ///
    /// # Errors
    ///
    /// I/O failures on the inbound connection.
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> ConnectionResult<()> {
        let id = self.session.id();
        internal!(level = DEBUG, session = id, "Connected");

        let result = self.serve(&mut signal).await;

        if let Err(err) = self.session.logout().await {
            internal!(level = WARN, session = id, "Failed to close forwarder: {err}");
        }

        match &result {
            Ok(()) => internal!(level = DEBUG, session = id, "Connection closed"),
            Err(err) => internal!(level = WARN, session = id, "Connection failed: {err}"),
        }

        result
    }

    async fn serve(&mut self, signal: &mut broadcast::Receiver<Signal>) -> ConnectionResult<()> {
        self.connection
            .send(&Reply {
                status: Status::ServiceReady,
                enhanced: None,
                message: format!("{} LMTP bridge ready", self.config.hostname),
            })
            .await?;

        loop {
            if self.started.elapsed() >= self.config.timeouts.connection_timeout() {
                internal!(level = INFO, session = self.session.id(), "Connection lifetime exceeded");
                self.connection
                    .send(&Reply::new(
                        Status::Unavailable,
                        EnhancedCode::TIMEOUT,
                        "Connection time limit exceeded",
                    ))
                    .await?;
                return Ok(());
            }

            let received = tokio::select! {
                _ = signal.recv() => None,
                line = timeout(self.config.timeouts.command_timeout(), self.connection.read_line()) => Some(line),
            };

            let Some(received) = received else {
                internal!(level = INFO, session = self.session.id(), "Shutting down session");
                self.connection
                    .send(&Reply::new(
                        Status::Unavailable,
                        EnhancedCode::SYSTEM_NOT_ACCEPTING,
                        "Server shutting down",
                    ))
                    .await?;
                return Ok(());
            };

            let line = match received {
                Err(_) => {
                    internal!(level = INFO, session = self.session.id(), "Client timed out");
                    self.connection
                        .send(&Reply::new(
                            Status::Unavailable,
                            EnhancedCode::TIMEOUT,
                            "Timed out waiting for command",
                        ))
                        .await?;
                    return Ok(());
                }
                Ok(Err(ConnectionError::Closed)) => return Ok(()),
                Ok(Err(ConnectionError::LineTooLong(_))) => {
                    self.connection
                        .send(&Reply::new(
                            Status::SyntaxError,
                            EnhancedCode::SYNTAX_ERROR,
                            "Line too long",
                        ))
                        .await?;
                    continue;
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(line)) => line,
            };

            let command = Command::try_from(line.as_slice()).unwrap_or_else(|invalid| invalid);
            incoming!("{command}");

            if self.handle(command).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    fn advance(&mut self, event: Event) {
        self.state.advance(event, &mut self.envelope);
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            self.config.hostname.clone(),
            String::from("PIPELINING"),
            String::from("ENHANCEDSTATUSCODES"),
            String::from("8BITMIME"),
            format!("SIZE {}", self.config.max_message_size),
        ]
    }

    async fn handle(&mut self, command: Command) -> ConnectionResult<Flow> {
        if !self.state.allows(&command) {
            let reply = if command == Command::Data && self.state == State::MailFrom {
                SessionError::NoRecipients.to_reply()
            } else {
                Reply::new(
                    Status::InvalidCommandSequence,
                    EnhancedCode::INVALID_COMMAND,
                    format!("Bad sequence of commands: {} not allowed here", command.verb()),
                )
            };

            self.connection.send(&reply).await?;
            return Ok(Flow::Continue);
        }

        let reply = match command {
            Command::Lhlo(id) => {
                if self.state.in_transaction() {
                    if let Err(err) = self.session.reset().await {
                        internal!(level = WARN, session = self.session.id(), "Reset on LHLO failed: {err}");
                    }
                }

                self.advance(Event::Lhlo(id));
                let capabilities = self.capabilities();
                self.connection
                    .send_lines(Status::Ok, &capabilities)
                    .await?;
                return Ok(Flow::Continue);
            }
            Command::Helo(_) => Reply::new(
                Status::SyntaxError,
                EnhancedCode::INVALID_COMMAND,
                "This is LMTP, use LHLO",
            ),
            Command::MailFrom(from, params) => {
                if params
                    .size()
                    .is_some_and(|size| size > self.config.max_message_size)
                {
                    message_too_big()
                } else {
                    match self.session.mail(&from, &params).await {
                        Ok(()) => {
                            self.advance(Event::Mail(from));
                            Reply::new(Status::Ok, EnhancedCode::OTHER_ADDRESS, "Sender OK")
                        }
                        Err(err) => err.to_reply(),
                    }
                }
            }
            Command::RcptTo(to, _) => match self.session.rcpt(&to).await {
                Ok(()) => {
                    self.advance(Event::Rcpt(to));
                    Reply::new(Status::Ok, EnhancedCode(2, 1, 5), "Recipient OK")
                }
                Err(err) => err.to_reply(),
            },
            Command::Data => return self.data().await,
            Command::Rset => {
                let reply = match self.session.reset().await {
                    Ok(()) => Reply::ok("Reset OK"),
                    Err(err) => err.to_reply(),
                };
                self.advance(Event::Reset);
                reply
            }
            Command::Noop => Reply::ok("OK"),
            Command::Quit => {
                self.advance(Event::Quit);
                self.connection
                    .send(&Reply::new(
                        Status::GoodBye,
                        EnhancedCode::OK,
                        format!("{} closing connection", self.config.hostname),
                    ))
                    .await?;
                return Ok(Flow::Close);
            }
            Command::Vrfy(_) => Reply::new(
                Status::CannotVerify,
                EnhancedCode(2, 5, 0),
                "Cannot VRFY user, but will accept message and attempt delivery",
            ),
            Command::Help => Reply::new(
                Status::HelpMessage,
                EnhancedCode::OK,
                "LHLO MAIL RCPT DATA RSET NOOP QUIT VRFY HELP",
            ),
            Command::Auth(argument) => {
                let initial_response = argument.split_once(' ').map(|(_, response)| response);
                match self.session.auth_plain(initial_response) {
                    Ok(never) => match never {},
                    Err(err) => err.to_reply(),
                }
            }
            Command::Invalid(reason) => Reply::new(
                Status::SyntaxError,
                EnhancedCode::SYNTAX_ERROR,
                format!("Syntax error: {reason}"),
            ),
        };

        self.connection.send(&reply).await?;
        Ok(Flow::Continue)
    }

    async fn data(&mut self) -> ConnectionResult<Flow> {
        self.connection
            .send(&Reply {
                status: Status::StartMailInput,
                enhanced: None,
                message: String::from("Start mail input; end with <CRLF>.<CRLF>"),
            })
            .await?;

        let max_message_size = self.config.max_message_size;
        let body = match timeout(
            self.config.timeouts.data_timeout(),
            self.connection.read_body(max_message_size),
        )
        .await
        {
            Ok(body) => body?,
            Err(_) => {
                internal!(level = INFO, session = self.session.id(), "Timed out receiving message data");
                self.connection
                    .send(&Reply::new(
                        Status::Unavailable,
                        EnhancedCode::TIMEOUT,
                        "Timed out waiting for message data",
                    ))
                    .await?;
                return Ok(Flow::Close);
            }
        };

        let replies = match body {
            Body::TooLarge(size) => {
                internal!(
                    level = INFO,
                    session = self.session.id(),
                    "Message of {size} bytes exceeds the {max_message_size} byte limit"
                );
                if let Err(err) = self.session.reset().await {
                    internal!(level = WARN, session = self.session.id(), "Reset failed: {err}");
                }

                vec![message_too_big(); self.envelope.recipients.len()]
            }
            Body::Complete(message) => {
                let mut outcomes = Outcomes::new(&self.envelope.recipients);
                let result = self.session.data(message.as_slice(), &mut outcomes).await;
                outcomes.into_replies(result.err().map(|err| err.to_reply()))
            }
        };

        self.advance(Event::DataComplete);

        for reply in &replies {
            self.connection.send(reply).await?;
        }

        Ok(Flow::Continue)
    }
}

fn message_too_big() -> Reply {
    Reply::new(
        Status::ExceededStorage,
        EnhancedCode::MESSAGE_TOO_BIG,
        "Message size exceeds fixed maximum message size",
    )
}

/// One reply slot per accepted recipient, in RCPT order.
struct Outcomes {
    slots: Vec<(String, Option<Reply>)>,
}

impl Outcomes {
    fn new(recipients: &[String]) -> Self {
        Self {
            slots: recipients
                .iter()
                .map(|recipient| (recipient.clone(), None))
                .collect(),
        }
    }

    /// Recipients without a status get `fallback`, the transaction's own
    /// error reply.
    fn into_replies(self, fallback: Option<Reply>) -> Vec<Reply> {
        self.slots
            .into_iter()
            .map(|(_, reply)| {
                reply.or_else(|| fallback.clone()).unwrap_or_else(|| {
                    Reply::new(
                        Status::ActionUnavailable,
                        EnhancedCode::TEMPORARY_SYSTEM,
                        "No delivery status received",
                    )
                })
            })
            .collect()
    }
}

impl StatusCollector for Outcomes {
    fn set_status(&mut self, recipient: &str, result: Result<(), ForwardError>) {
        let reply = match result {
            Ok(()) => Reply::ok(format!("<{recipient}> delivered")),
            Err(err) => err.to_reply(),
        };

        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|(r, reply)| r == recipient && reply.is_none())
        {
            slot.1 = Some(reply);
        }
    }
}
