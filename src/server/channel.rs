//! Framed reads and writes on the client leg.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsAcceptor;

use super::{
    body::{Body, BodyBuilder},
    connection::Connection,
    transcript::{Side, Transcript},
};
use crate::{
    config::Timeouts,
    error::{Rejection, SessionError},
    incoming, outgoing,
    status::{EnhancedCode, Reply},
};

/// Longest command line accepted from a client.
const MAX_LINE_LENGTH: u64 = 64 * 1024;

/// Largest piece of a body line read at once.
const MAX_CHUNK_LENGTH: u64 = 1024 * 1024;

async fn within<T>(
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, SessionError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SessionError::Timeout(limit.as_secs()))?
        .map_err(SessionError::from)
}

/// The lines a reply is written as: one per `\n` in its message, all but
/// the last marked as continued.
#[must_use]
pub fn render(reply: &Reply) -> Vec<String> {
    let lines: Vec<&str> = reply.message.split('\n').collect();
    let last = lines.len() - 1;

    lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let separator = if index == last { ' ' } else { '-' };
            match reply.enhanced {
                Some(enhanced) => format!("{}{separator}{enhanced} {line}", reply.code),
                None => format!("{}{separator}{line}", reply.code),
            }
        })
        .collect()
}

/// The reply a client receives for a failed phase.
///
/// Failures with no reply code from the relay become a transient `451`.
#[must_use]
pub fn client_reply(rejection: &Rejection) -> Reply {
    if rejection.reply.code == 0 {
        Reply::new(451, rejection.reply.message.clone()).with_enhanced(EnhancedCode::new(4, 3, 0))
    } else {
        rejection.reply.clone()
    }
}

pub struct Channel<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    reader: BufReader<Connection<Stream>>,
    peer: SocketAddr,
    timeouts: Timeouts,
    transcript: Option<Arc<Transcript>>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Channel<Stream> {
    pub fn new(
        stream: Stream,
        peer: SocketAddr,
        timeouts: Timeouts,
        transcript: Option<Arc<Transcript>>,
    ) -> Self {
        Self {
            reader: BufReader::new(Connection::Plain(stream)),
            peer,
            timeouts,
            transcript,
        }
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.reader.get_ref().is_tls()
    }

    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn record(&self, side: Side, line: &str) {
        if let Some(transcript) = &self.transcript {
            transcript.record(self.peer, side, line).await;
        }
    }

    /// Read one raw line, up to `max` bytes. Empty at end of stream.
    async fn read_chunk(&mut self, max: u64) -> Result<Vec<u8>, SessionError> {
        let mut line = Vec::new();
        let limit = self.timeouts.read();
        let reader = &mut self.reader;

        within(limit, async {
            reader.take(max).read_until(b'\n', &mut line).await
        })
        .await?;

        Ok(line)
    }

    /// Read a command line, without its line ending.
    ///
    /// Returns `None` once the client has closed the connection.
    ///
    /// # Errors
    ///
    /// Fails on a transport error, a timeout or an over-long line.
    pub async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        let line = self.read_chunk(MAX_LINE_LENGTH).await?;

        if line.is_empty() {
            return Ok(None);
        }

        if !line.ends_with(b"\n") && line.len() as u64 >= MAX_LINE_LENGTH {
            return Err(SessionError::Protocol(format!(
                "command line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }

        let line = String::from_utf8_lossy(&line)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        incoming!("{line}");
        self.record(Side::Client, &line).await;

        Ok(Some(line))
    }

    /// Read a DATA body up to its terminating `.` line.
    ///
    /// # Errors
    ///
    /// Fails on a transport error or a timeout, or if the client closes
    /// the connection before the terminator.
    pub async fn read_body(&mut self, limit: usize) -> Result<Body, SessionError> {
        let mut builder = BodyBuilder::new(limit);

        loop {
            let chunk = self.read_chunk(MAX_CHUNK_LENGTH).await?;

            if chunk.is_empty() {
                return Err(SessionError::Protocol(String::from(
                    "connection closed during DATA",
                )));
            }

            if self.transcript.is_some() {
                self.record(Side::Client, &String::from_utf8_lossy(&chunk)).await;
            }

            if builder.push(&chunk) {
                let body = builder.finish();
                match &body {
                    Body::Complete(bytes) => incoming!("<message body, {} bytes>", bytes.len()),
                    Body::TooLarge { size } => incoming!("<message body, {size} bytes, discarded>"),
                }
                return Ok(body);
            }
        }
    }

    /// Write a reply.
    ///
    /// # Errors
    ///
    /// Fails on a transport error or a timeout.
    pub async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        let mut out = String::new();

        for line in render(reply) {
            outgoing!("{line}");
            self.record(Side::Server, &line).await;
            out.push_str(&line);
            out.push_str("\r\n");
        }

        let limit = self.timeouts.write();
        let connection = self.reader.get_mut();

        within(limit, async {
            connection.write_all(out.as_bytes()).await?;
            connection.flush().await
        })
        .await
    }

    /// Write the reply for a failed phase.
    ///
    /// # Errors
    ///
    /// As [`Channel::send`].
    pub async fn reject(&mut self, rejection: &Rejection) -> Result<(), SessionError> {
        self.send(&client_reply(rejection)).await
    }

    /// Switch the client leg to TLS. Anything the client pipelined
    /// behind STARTTLS is discarded.
    ///
    /// # Errors
    ///
    /// Fails if the handshake does not complete in time.
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> Result<Self, SessionError> {
        let Self {
            reader,
            peer,
            timeouts,
            transcript,
        } = self;

        let limit = timeouts.connect();
        let connection = tokio::time::timeout(limit, reader.into_inner().upgrade(acceptor))
            .await
            .map_err(|_| SessionError::Timeout(limit.as_secs()))?
            .map_err(|err| SessionError::Tls(err.to_string()))?;

        Ok(Self {
            reader: BufReader::new(connection),
            peer,
            timeouts,
            transcript,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{error::ProxyError, status::Status};

    fn channel(stream: tokio::io::DuplexStream) -> Channel<tokio::io::DuplexStream> {
        Channel::new(
            stream,
            "127.0.0.1:2525".parse().unwrap(),
            Timeouts::default(),
            None,
        )
    }

    #[test]
    fn test_render() {
        let reply = Reply::of(Status::Ok, "mx.test Hello client\nSIZE 1000\n8BITMIME");
        assert_eq!(
            render(&reply),
            ["250-mx.test Hello client", "250-SIZE 1000", "250 8BITMIME"]
        );

        let reply = Reply::new(550, "No such user").with_enhanced(EnhancedCode::new(5, 1, 1));
        assert_eq!(render(&reply), ["550 5.1.1 No such user"]);
    }

    #[test]
    fn test_unset_reply_becomes_transient() {
        let rejection = Rejection::new(
            Reply::unset("Connection closed unexpectedly"),
            ProxyError::Blocked(String::new()),
        );
        assert_eq!(
            client_reply(&rejection).to_string(),
            "451 4.3.0 Connection closed unexpectedly"
        );

        let reply = Reply::new(554, "Rejected").with_enhanced(EnhancedCode::new(5, 7, 1));
        let rejection = Rejection::new(reply.clone(), ProxyError::Blocked(String::new()));
        assert_eq!(client_reply(&rejection), reply);
    }

    #[tokio::test]
    async fn test_lines_and_body() {
        let (client, server) = tokio::io::duplex(1024);
        let mut channel = channel(server);
        let (mut read_half, mut write_half) = tokio::io::split(client);

        write_half
            .write_all(b"MAIL FROM:<a@example.com>\r\nbody\r\n..dot\r\n.\r\n")
            .await
            .unwrap();
        write_half.shutdown().await.unwrap();

        assert_eq!(
            channel.read_line().await.unwrap().as_deref(),
            Some("MAIL FROM:<a@example.com>")
        );
        assert_eq!(
            channel.read_body(1024).await.unwrap(),
            Body::Complete(b"body\r\n.dot\r\n".to_vec())
        );
        assert_eq!(channel.read_line().await.unwrap(), None);

        channel.send(&Reply::of(Status::Ok, "OK")).await.unwrap();
        drop(channel);

        let mut written = String::new();
        read_half.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "250 OK\r\n");
    }

    #[tokio::test]
    async fn test_eof_during_body() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut channel = channel(server);

        client.write_all(b"partial body\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        assert!(matches!(
            channel.read_body(1024).await,
            Err(SessionError::Protocol(_))
        ));
    }
}
