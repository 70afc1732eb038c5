use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use crate::{
    error::{ConnectionError, ConnectionResult},
    incoming, outgoing,
    status::{Reply, Status},
};

/// Longest command line accepted, including the trailing CRLF.
pub const MAX_LINE_LENGTH: usize = 1000;

/// Body lines longer than this are read in pieces.
const BODY_CHUNK_SIZE: usize = 8192;

/// A message body received after `DATA`.
#[derive(Debug, PartialEq, Eq)]
pub enum Body {
    /// The dot-unstuffed body.
    Complete(Vec<u8>),
    /// The body exceeded the limit; holds the size actually received.
    TooLarge(usize),
}

/// Line oriented I/O on the inbound stream.
pub struct Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    stream: BufReader<Stream>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, reply: &Reply) -> ConnectionResult<()> {
        outgoing!("{reply}");

        self.stream
            .write_all(format!("{reply}\r\n").as_bytes())
            .await?;
        self.stream.flush().await?;

        Ok(())
    }

    /// Send a multi-line reply, `250-first` through `250 last`.
    pub async fn send_lines(&mut self, status: Status, lines: &[String]) -> ConnectionResult<()> {
        let mut buffer = String::new();

        for (index, line) in lines.iter().enumerate() {
            let separator = if index + 1 == lines.len() { ' ' } else { '-' };
            outgoing!("{status}{separator}{line}");
            buffer.push_str(&format!("{status}{separator}{line}\r\n"));
        }

        self.stream.write_all(buffer.as_bytes()).await?;
        self.stream.flush().await?;

        Ok(())
    }

    async fn read_chunk(&mut self, limit: usize, buffer: &mut Vec<u8>) -> ConnectionResult<usize> {
        Ok((&mut self.stream)
            .take(limit as u64)
            .read_until(b'\n', buffer)
            .await?)
    }

    /// Read one command line, without its line ending.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] at end of stream, and
    /// [`ConnectionError::LineTooLong`] once the rest of an overlong line
    /// has been discarded.
    pub async fn read_line(&mut self) -> ConnectionResult<Vec<u8>> {
        let mut line = Vec::new();

        if self.read_chunk(MAX_LINE_LENGTH, &mut line).await? == 0 {
            return Err(ConnectionError::Closed);
        }

        if !line.ends_with(b"\n") && line.len() >= MAX_LINE_LENGTH {
            self.discard_line().await?;
            return Err(ConnectionError::LineTooLong(MAX_LINE_LENGTH));
        }

        while line.last().is_some_and(|b| matches!(b, b'\r' | b'\n')) {
            line.pop();
        }

        Ok(line)
    }

    async fn discard_line(&mut self) -> ConnectionResult<()> {
        let mut scratch = Vec::new();

        loop {
            scratch.clear();
            if self.read_chunk(MAX_LINE_LENGTH, &mut scratch).await? == 0 {
                return Err(ConnectionError::Closed);
            }

            if scratch.ends_with(b"\n") {
                return Ok(());
            }
        }
    }

    /// Read a message body up to the terminating `.` line, removing dot
    /// stuffing. Reading continues past `max_size` so the stream stays in
    /// sync, but the excess is not kept.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] if the stream ends before the terminator.
    pub async fn read_body(&mut self, max_size: usize) -> ConnectionResult<Body> {
        let mut body = Vec::new();
        let mut chunk = Vec::new();
        let mut received = 0;
        let mut at_line_start = true;

        loop {
            chunk.clear();
            if self.read_chunk(BODY_CHUNK_SIZE, &mut chunk).await? == 0 {
                return Err(ConnectionError::Closed);
            }

            if at_line_start && matches!(chunk.as_slice(), b".\r\n" | b".\n") {
                break;
            }

            let data = if at_line_start && chunk.first() == Some(&b'.') {
                &chunk[1..]
            } else {
                &chunk[..]
            };

            received += data.len();
            if received <= max_size {
                body.extend_from_slice(data);
            }

            at_line_start = chunk.ends_with(b"\n");
        }

        incoming!("Received {received} bytes of message data");

        if received > max_size {
            Ok(Body::TooLarge(received))
        } else {
            Ok(Body::Complete(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::status::EnhancedCode;

    #[tokio::test]
    async fn reads_lines_without_endings() {
        let (client, server) = duplex(4096);
        let mut connection = Connection::new(server);
        let mut client = client;

        client.write_all(b"LHLO client\r\nNOOP\n").await.unwrap();
        drop(client);

        assert_eq!(connection.read_line().await.unwrap(), b"LHLO client");
        assert_eq!(connection.read_line().await.unwrap(), b"NOOP");
        assert!(matches!(
            connection.read_line().await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn overlong_line_is_discarded() {
        let (mut client, server) = duplex(8192);
        let mut connection = Connection::new(server);

        let long = "X".repeat(MAX_LINE_LENGTH * 2);
        client
            .write_all(format!("{long}\r\nNOOP\r\n").as_bytes())
            .await
            .unwrap();

        assert!(matches!(
            connection.read_line().await,
            Err(ConnectionError::LineTooLong(_))
        ));
        assert_eq!(connection.read_line().await.unwrap(), b"NOOP");
    }

    #[tokio::test]
    async fn body_is_dot_unstuffed() {
        let (mut client, server) = duplex(4096);
        let mut connection = Connection::new(server);

        client
            .write_all(b"Subject: dots\r\n\r\n..leading dot\r\n.\r\nQUIT\r\n")
            .await
            .unwrap();

        assert_eq!(
            connection.read_body(1024).await.unwrap(),
            Body::Complete(b"Subject: dots\r\n\r\n.leading dot\r\n".to_vec())
        );
        assert_eq!(connection.read_line().await.unwrap(), b"QUIT");
    }

    #[tokio::test]
    async fn oversized_body_is_drained() {
        let (mut client, server) = duplex(4096);
        let mut connection = Connection::new(server);

        client
            .write_all(b"0123456789\r\n0123456789\r\n.\r\nNOOP\r\n")
            .await
            .unwrap();

        assert_eq!(connection.read_body(16).await.unwrap(), Body::TooLarge(24));
        assert_eq!(connection.read_line().await.unwrap(), b"NOOP");
    }

    #[tokio::test]
    async fn body_without_terminator() {
        let (mut client, server) = duplex(4096);
        let mut connection = Connection::new(server);

        client.write_all(b"partial\r\n").await.unwrap();
        drop(client);

        assert!(matches!(
            connection.read_body(1024).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn writes_replies() {
        let (mut client, server) = duplex(4096);
        let mut connection = Connection::new(server);

        connection
            .send(&Reply::new(Status::Ok, EnhancedCode::OK, "OK"))
            .await
            .unwrap();
        connection
            .send_lines(Status::Ok, &["host".to_string(), "PIPELINING".to_string()])
            .await
            .unwrap();
        drop(connection);

        let mut written = String::new();
        client.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "250 2.0.0 OK\r\n250-host\r\n250 PIPELINING\r\n");
    }
}
