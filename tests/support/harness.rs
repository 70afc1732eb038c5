//! End-to-end test harness for the bridge
//!
//! Starts a [`Server`] on a temporary Unix socket, forwarding to a
//! [`MockLmtpServer`], and provides a small line-based client to talk to it.
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use lmtp_bridge::{
    client::LmtpForwarderFactory,
    config::{ClientTimeouts, Config, Timeouts},
    error::ServerError,
    listener::{ListenAddress, Listener},
    resolver::StaticResolver,
    server::Server,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixStream,
    },
    task::JoinHandle,
    time::timeout,
};

use super::mock_server::{MockLmtpServer, MockLmtpServerBuilder};

pub struct BridgeHarness {
    /// Keeps the socket directory alive for the lifetime of the harness
    _dir: TempDir,
    socket: PathBuf,
    server: Arc<Server>,
    serving: JoinHandle<Result<(), ServerError>>,
    mock: Option<MockLmtpServer>,
}

impl BridgeHarness {
    /// Start the bridge in front of a mock server built from `mock`, resolving
    /// identifiers through `recipients`.
    ///
    /// # Errors
    ///
    /// Returns an error if either socket cannot be bound.
    pub async fn start(
        mock: MockLmtpServerBuilder,
        recipients: &[(&str, &str)],
    ) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let mock = mock.build(dir.path().join("downstream.sock"))?;
        Self::with_downstream(dir, Some(mock), recipients).await
    }

    /// Start the bridge pointed at a downstream socket that does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge socket cannot be bound.
    pub async fn unreachable(recipients: &[(&str, &str)]) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::with_downstream(dir, None, recipients).await
    }

    async fn with_downstream(
        dir: TempDir,
        mock: Option<MockLmtpServer>,
        recipients: &[(&str, &str)],
    ) -> anyhow::Result<Self> {
        let socket = dir.path().join("bridge.sock");
        let config = Config {
            listen: ListenAddress::Unix(socket.clone()),
            forward: dir.path().join("downstream.sock"),
            hostname: "bridge.test".to_string(),
            max_message_size: 64 * 1024,
            timeouts: Timeouts {
                client: ClientTimeouts {
                    connect_secs: 2,
                    command_secs: 2,
                    data_secs: 2,
                },
                status_wait_secs: 2,
                ..Timeouts::default()
            },
            recipients: recipients
                .iter()
                .map(|(identifier, target)| ((*identifier).to_string(), (*target).to_string()))
                .collect::<HashMap<_, _>>(),
        };
        config.validate()?;

        let listener = Listener::bind(&config.listen).await?;
        let server = Arc::new(Server::new(
            &config,
            Arc::new(StaticResolver::new(config.recipients.clone())),
            Arc::new(LmtpForwarderFactory::from(&config)),
        ));

        let serving = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener).await }
        });

        Ok(Self {
            _dir: dir,
            socket,
            server,
            serving,
            mock,
        })
    }

    /// Connect a client. The greeting is left for the test to read.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge cannot be reached.
    pub async fn connect(&self) -> anyhow::Result<LmtpTestClient> {
        let stream = UnixStream::connect(&self.socket).await?;
        let (read, write) = stream.into_split();

        Ok(LmtpTestClient {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Commands the mock downstream server received.
    pub async fn downstream_commands(&self) -> Vec<super::LmtpCommand> {
        match &self.mock {
            Some(mock) => mock.commands().await,
            None => Vec::new(),
        }
    }

    pub async fn downstream_messages(&self) -> Vec<Vec<u8>> {
        match &self.mock {
            Some(mock) => mock.messages().await,
            None => Vec::new(),
        }
    }

    /// Close the bridge and wait for it to stop serving.
    ///
    /// # Errors
    ///
    /// Returns the server's own error, if it stopped with one.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.server.close();
        timeout(Duration::from_secs(5), self.serving).await???;

        if let Some(mock) = &self.mock {
            mock.shutdown();
        }

        Ok(())
    }
}

pub struct LmtpTestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LmtpTestClient {
    /// Read one reply line, without its line ending. `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing arrives within five seconds.
    pub async fn line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let read = timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await??;

        if read == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Read a complete, possibly multi-line, reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection closes part way.
    pub async fn reply(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();

        loop {
            let line = self
                .line()
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection closed mid reply"))?;
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);

            if last {
                return Ok(lines);
            }
        }
    }

    /// Send a line and return the last line of the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn command(&mut self, line: &str) -> anyhow::Result<String> {
        self.send(line).await?;
        let mut reply = self.reply().await?;
        reply
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty reply to {line}"))
    }

    /// Send raw bytes followed by CRLF.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await?;
        Ok(())
    }

    /// Send a message body after a `354`, then read one reply per recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if DATA isn't accepted or a reply is missing.
    pub async fn data(&mut self, body: &str, recipients: usize) -> anyhow::Result<Vec<String>> {
        let start = self.command("DATA").await?;
        anyhow::ensure!(start.starts_with("354"), "DATA refused: {start}");

        self.writer.write_all(body.as_bytes()).await?;
        self.writer.write_all(b".\r\n").await?;

        let mut replies = Vec::with_capacity(recipients);
        for _ in 0..recipients {
            replies.push(self.command_reply().await?);
        }

        Ok(replies)
    }

    async fn command_reply(&mut self) -> anyhow::Result<String> {
        let mut reply = self.reply().await?;
        reply
            .pop()
            .ok_or_else(|| anyhow::anyhow!("empty reply"))
    }
}
