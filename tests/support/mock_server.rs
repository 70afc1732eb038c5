//! Mock downstream LMTP server
//!
//! Accepts every recipient and message unless told otherwise, and records
//! the commands it received for later inspection.
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::RwLock,
    task::JoinHandle,
};

/// LMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LmtpCommand {
    Lhlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content after DATA, dot-unstuffed
    MessageContent(Vec<u8>),
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone, Default)]
struct MockServerConfig {
    /// Recipients refused at RCPT time
    rejected_recipients: HashMap<String, String>,
    /// Recipients accepted at RCPT time but failed after the message
    failed_deliveries: HashMap<String, String>,
}

pub struct MockLmtpServer {
    path: PathBuf,
    commands_received: Arc<RwLock<Vec<LmtpCommand>>>,
    handle: JoinHandle<()>,
}

impl MockLmtpServer {
    #[must_use]
    pub fn builder() -> MockLmtpServerBuilder {
        MockLmtpServerBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Get all commands received by the server
    pub async fn commands(&self) -> Vec<LmtpCommand> {
        self.commands_received.read().await.clone()
    }

    /// Contents of every message received
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                LmtpCommand::MessageContent(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }

    async fn handle_connection(
        stream: UnixStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<LmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut accepted: Vec<String> = Vec::new();
        let mut line = String::new();

        write.write_all(b"220 mock LMTP ready\r\n").await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let command = line.trim_end_matches(['\r', '\n']).to_string();
            let upper = command.to_ascii_uppercase();

            let response = if let Some(host) = upper.strip_prefix("LHLO ") {
                commands.write().await.push(LmtpCommand::Lhlo(host.to_lowercase()));
                "250-mock\r\n250 PIPELINING\r\n".to_string()
            } else if upper.starts_with("MAIL FROM:") {
                accepted.clear();
                commands
                    .write()
                    .await
                    .push(LmtpCommand::MailFrom(path_of(&command["MAIL FROM:".len()..])));
                "250 2.1.0 OK\r\n".to_string()
            } else if upper.starts_with("RCPT TO:") {
                let recipient = path_of(&command["RCPT TO:".len()..]);
                commands
                    .write()
                    .await
                    .push(LmtpCommand::RcptTo(recipient.clone()));

                if let Some(reply) = config.rejected_recipients.get(&recipient) {
                    format!("{reply}\r\n")
                } else {
                    accepted.push(recipient);
                    "250 2.1.5 OK\r\n".to_string()
                }
            } else if upper == "DATA" {
                commands.write().await.push(LmtpCommand::Data);
                if accepted.is_empty() {
                    "503 5.5.1 No valid recipients\r\n".to_string()
                } else {
                    write
                        .write_all(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
                        .await?;

                    let content = read_message(&mut reader).await?;
                    commands
                        .write()
                        .await
                        .push(LmtpCommand::MessageContent(content));

                    accepted
                        .drain(..)
                        .map(|recipient| {
                            config.failed_deliveries.get(&recipient).map_or_else(
                                || format!("250 2.0.0 <{recipient}> delivered\r\n"),
                                |reply| format!("{reply}\r\n"),
                            )
                        })
                        .collect()
                }
            } else if upper == "RSET" {
                accepted.clear();
                commands.write().await.push(LmtpCommand::Rset);
                "250 2.0.0 OK\r\n".to_string()
            } else if upper == "QUIT" {
                commands.write().await.push(LmtpCommand::Quit);
                write.write_all(b"221 2.0.0 Bye\r\n").await?;
                return Ok(());
            } else {
                commands.write().await.push(LmtpCommand::Other(command));
                "500 5.5.2 Unrecognised command\r\n".to_string()
            };

            write.write_all(response.as_bytes()).await?;
        }
    }
}

fn path_of(argument: &str) -> String {
    argument
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

async fn read_message<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut content = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(content);
        }

        if line == b".\r\n" || line == b".\n" {
            return Ok(content);
        }

        let unstuffed = if line.first() == Some(&b'.') {
            &line[1..]
        } else {
            &line[..]
        };
        content.extend_from_slice(unstuffed);
    }
}

#[derive(Default)]
pub struct MockLmtpServerBuilder {
    config: MockServerConfig,
}

impl MockLmtpServerBuilder {
    /// Refuse `recipient` at RCPT time with `reply`, e.g. `550 5.1.1 User unknown`
    #[must_use]
    pub fn with_rejected_recipient(mut self, recipient: &str, reply: &str) -> Self {
        self.config
            .rejected_recipients
            .insert(recipient.to_string(), reply.to_string());
        self
    }

    /// Accept `recipient` but answer the end of its message with `reply`
    #[must_use]
    pub fn with_failed_delivery(mut self, recipient: &str, reply: &str) -> Self {
        self.config
            .failed_deliveries
            .insert(recipient.to_string(), reply.to_string());
        self
    }

    /// Start serving on `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn build(self, path: PathBuf) -> std::io::Result<MockLmtpServer> {
        let listener = UnixListener::bind(&path)?;
        let config = Arc::new(self.config);
        let commands_received = Arc::new(RwLock::new(Vec::new()));

        let handle = tokio::spawn({
            let commands = Arc::clone(&commands_received);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        let _ = MockLmtpServer::handle_connection(stream, config, commands).await;
                    });
                }
            }
        });

        Ok(MockLmtpServer {
            path,
            commands_received,
            handle,
        })
    }
}
