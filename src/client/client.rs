use std::path::Path;

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    time::{error::Elapsed, timeout},
};

use super::response::Response;
use crate::{
    config::{ClientTimeouts, TimeoutConfig},
    error::{ClientError, ClientResult, ForwardError},
    incoming,
    lmtp::command::MailParameters,
    outgoing,
    session::StatusSender,
    traits::{DataSink, Forwarder},
};

/// An LMTP client talking to the downstream server over a Unix socket.
///
/// Recipients the server accepted are remembered in order, since the
/// server answers the end of `DATA` with one reply per recipient.
#[derive(Debug)]
pub struct LmtpClient {
    stream: BufReader<UnixStream>,
    timeouts: ClientTimeouts,
    accepted: Vec<String>,
    /// Set when an exchange failed part way and the stream may be out of
    /// sync with the server.
    broken: bool,
}

impl LmtpClient {
    /// Connect to `path`, read the greeting and introduce ourselves as
    /// `hostname`.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be reached within the connect timeout or
    /// the server does not greet us with `220` and accept our `LHLO`.
    pub async fn connect(
        path: &Path,
        hostname: &str,
        timeouts: ClientTimeouts,
    ) -> ClientResult<Self> {
        let stream = timeout(timeouts.connect_timeout(), UnixStream::connect(path))
            .await
            .map_err(|_| ClientError::Timeout("connect"))?
            .map_err(|source| ClientError::Connect {
                path: path.to_path_buf(),
                source,
            })?;

        let mut client = Self {
            stream: BufReader::new(stream),
            timeouts,
            accepted: Vec::new(),
            broken: false,
        };

        let outcome = timeout(client.timeouts.command_timeout(), client.read_response()).await;
        let greeting = client.settle("greeting", outcome)?;
        if greeting.code != 220 {
            return Err(ClientError::UnexpectedResponse {
                command: "greeting",
                reply: greeting.to_reply(),
            });
        }

        let lhlo = client.command("LHLO", &format!("LHLO {hostname}")).await?;
        if !lhlo.is_success() {
            return Err(ClientError::UnexpectedResponse {
                command: "LHLO",
                reply: lhlo.to_reply(),
            });
        }

        Ok(client)
    }

    /// Recipients accepted in the current transaction.
    #[must_use]
    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }

    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    async fn send_line(&mut self, line: &str) -> ClientResult<()> {
        outgoing!("{line}");

        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await?;
        self.stream.flush().await?;

        Ok(())
    }

    async fn read_response(&mut self) -> ClientResult<Response> {
        let mut response = None;
        let mut line = String::new();

        loop {
            line.clear();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(ClientError::Closed);
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            incoming!("{trimmed}");

            let parsed = Response::parse_line(trimmed)?;
            let is_last = parsed.is_last;
            Response::push(&mut response, parsed)?;

            if is_last {
                return response.ok_or_else(|| ClientError::Parse("Empty response".to_string()));
            }
        }
    }

    /// Settle the outcome of a timed exchange, marking the client broken if
    /// it failed part way.
    fn settle<T>(
        &mut self,
        name: &'static str,
        outcome: Result<ClientResult<T>, Elapsed>,
    ) -> ClientResult<T> {
        let result = outcome.unwrap_or(Err(ClientError::Timeout(name)));

        if result.is_err() {
            self.broken = true;
        }

        result
    }

    async fn exchange(&mut self, line: &str) -> ClientResult<Response> {
        self.send_line(line).await?;
        self.read_response().await
    }

    async fn command(&mut self, name: &'static str, line: &str) -> ClientResult<Response> {
        if self.broken {
            return Err(ClientError::Broken);
        }

        let outcome = timeout(self.timeouts.command_timeout(), self.exchange(line)).await;
        self.settle(name, outcome)
    }
}

fn rejected(response: &Response) -> ForwardError {
    ForwardError::Rejected(response.to_reply())
}

#[async_trait]
impl Forwarder for LmtpClient {
    async fn mail(&mut self, from: &str, params: &MailParameters) -> Result<(), ForwardError> {
        self.accepted.clear();

        let line = if params.is_empty() {
            format!("MAIL FROM:<{from}>")
        } else {
            format!("MAIL FROM:<{from}> {params}")
        };

        let response = self.command("MAIL", &line).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(rejected(&response))
        }
    }

    async fn rcpt(&mut self, to: &str) -> Result<(), ForwardError> {
        let response = self.command("RCPT", &format!("RCPT TO:<{to}>")).await?;
        if response.is_success() {
            self.accepted.push(to.to_string());
            Ok(())
        } else {
            Err(rejected(&response))
        }
    }

    async fn data<'a>(
        &'a mut self,
        statuses: StatusSender,
    ) -> Result<Box<dyn DataSink + 'a>, ForwardError> {
        let response = self.command("DATA", "DATA").await?;
        if response.code != 354 {
            return Err(rejected(&response));
        }

        let recipients = std::mem::take(&mut self.accepted);
        Ok(Box::new(LmtpDataSink {
            client: self,
            statuses,
            recipients,
            at_line_start: true,
            finished: false,
        }))
    }

    async fn reset(&mut self) -> Result<(), ForwardError> {
        self.accepted.clear();

        let response = self.command("RSET", "RSET").await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(rejected(&response))
        }
    }

    async fn close(&mut self) -> Result<(), ForwardError> {
        if !self.broken {
            // The server may drop the connection straight after its reply;
            // only the attempt matters.
            let _ = self.command("QUIT", "QUIT").await;
        }

        self.stream.get_mut().shutdown().await.ok();
        Ok(())
    }
}

/// Streams a message body downstream, dot-stuffing it on the way.
struct LmtpDataSink<'a> {
    client: &'a mut LmtpClient,
    statuses: StatusSender,
    recipients: Vec<String>,
    at_line_start: bool,
    finished: bool,
}

/// Double any `.` that starts a line. `at_line_start` carries across chunks.
fn dot_stuff(chunk: &[u8], at_line_start: &mut bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len() + 8);

    for &byte in chunk {
        if *at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        *at_line_start = byte == b'\n';
    }

    out
}

impl LmtpDataSink<'_> {
    async fn write_raw(&mut self, data: &[u8]) -> std::io::Result<()> {
        match timeout(
            self.client.timeouts.data_timeout(),
            self.client.stream.write_all(data),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out writing message data",
            )),
        }
    }

    async fn finish(&mut self) -> ClientResult<()> {
        let terminator: &[u8] = if self.at_line_start { b".\r\n" } else { b"\r\n.\r\n" };
        self.write_raw(terminator).await?;
        self.client.stream.flush().await?;
        outgoing!(".");

        let limit = self.client.timeouts.data_timeout();
        let recipients = std::mem::take(&mut self.recipients);

        for (index, recipient) in recipients.iter().enumerate() {
            let response = match timeout(limit, self.client.read_response()).await {
                Ok(Ok(response)) => response,
                failure => {
                    let err = match failure {
                        Ok(Err(err)) => err,
                        _ => ClientError::Timeout("DATA"),
                    };
                    self.client.broken = true;

                    for remaining in &recipients[index..] {
                        self.statuses.report(
                            remaining.clone(),
                            Err(ForwardError::Unavailable(err.to_string())),
                        );
                    }

                    return Err(err);
                }
            };

            let result = if response.is_success() {
                Ok(())
            } else {
                Err(rejected(&response))
            };
            self.statuses.report(recipient.clone(), result);
        }

        Ok(())
    }
}

#[async_trait]
impl DataSink for LmtpDataSink<'_> {
    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        let stuffed = dot_stuff(chunk, &mut self.at_line_start);
        self.write_raw(&stuffed).await
    }

    async fn close(mut self: Box<Self>) -> Result<(), ForwardError> {
        // Statuses for every recipient have been reported even on failure.
        let result = self.finish().await;
        // Only set once the replies are read; a close dropped midway breaks the client.
        self.finished = true;

        if let Err(err) = result {
            incoming!(level = WARN, "Failed to read delivery statuses: {err}");
        }

        Ok(())
    }
}

impl Drop for LmtpDataSink<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.client.broken = true;
        }
    }
}
