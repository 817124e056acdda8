//! SMTP client for the relay leg.

use std::{future::Future, io, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::{Capabilities, Upstream, accepts, connection::ClientConnection, data::DataWriter, response::Response};
use crate::{
    config::{ProxyConfig, Timeouts},
    error::{UpstreamError, UpstreamResult},
    incoming,
    logging::marker,
    outgoing,
    status::{Reply, Status},
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// How the client introduces itself and secures the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Argument to EHLO/HELO.
    pub local_name: String,
    /// Name the relay's certificate must match.
    pub server_name: String,
    pub accept_invalid_certs: bool,
    pub timeouts: Timeouts,
}

impl ClientSettings {
    #[must_use]
    pub fn from_config(config: &ProxyConfig, local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            server_name: config.upstream_host().to_string(),
            accept_invalid_certs: config.upstream_tls.accept_invalid_certs,
            timeouts: config.timeouts,
        }
    }
}

pub struct UpstreamClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    capabilities: Capabilities,
    settings: ClientSettings,
    greeting: Reply,
    data_reply: Option<Reply>,
}

async fn within<T>(limit: Duration, fut: impl Future<Output = io::Result<T>>) -> UpstreamResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| UpstreamError::Timeout(limit.as_secs()))?
        .map_err(UpstreamError::from)
}

fn check(expect: u16, response: Response) -> UpstreamResult<Reply> {
    let accepted = !response.is_error() && accepts(expect, response.code);
    let reply = response.into_reply();

    if accepted {
        Ok(reply)
    } else {
        Err(UpstreamError::Rejected(reply))
    }
}

impl UpstreamClient {
    /// Dial `address` and read the relay's greeting.
    ///
    /// # Errors
    ///
    /// Fails if the connection cannot be made in time or the relay does not
    /// greet with a 2xx reply.
    pub async fn connect(address: &str, settings: ClientSettings) -> UpstreamResult<Self> {
        let stream = within(settings.timeouts.connect(), TcpStream::connect(address)).await?;

        let mut client = Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            capabilities: Capabilities::default(),
            settings,
            greeting: Reply::unset(""),
            data_reply: None,
        };

        let response = client.read_response().await?;
        client.greeting = check(2, response)?;

        Ok(client)
    }

    /// The relay's `220` greeting.
    #[must_use]
    pub const fn greeting(&self) -> &Reply {
        &self.greeting
    }

    async fn send_line(&mut self, line: &str) -> UpstreamResult<()> {
        outgoing!("{} {line}", marker(self.is_tls(), true));

        let limit = self.settings.timeouts.write();
        let connection = self
            .connection
            .as_mut()
            .ok_or(UpstreamError::ConnectionClosed)?;

        within(limit, async {
            connection.write_all(line.as_bytes()).await?;
            connection.write_all(b"\r\n").await?;
            connection.flush().await
        })
        .await
    }

    async fn read_response(&mut self) -> UpstreamResult<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                let direction = marker(self.is_tls(), false);
                for line in &response.lines {
                    incoming!("{direction} {} {line}", response.code);
                }

                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(UpstreamError::Parse(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let limit = self.settings.timeouts.read();
            let connection = self
                .connection
                .as_mut()
                .ok_or(UpstreamError::ConnectionClosed)?;

            let read = within(limit, connection.read(&mut self.buffer[self.buffer_pos..])).await?;
            if read == 0 {
                self.connection = None;
                return Err(UpstreamError::ConnectionClosed);
            }
            self.buffer_pos += read;
        }
    }

    async fn exchange(&mut self, line: &str) -> UpstreamResult<Response> {
        self.send_line(line).await?;
        self.read_response().await
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    type Writer = DataWriter<ClientConnection>;

    fn is_tls(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ClientConnection::is_tls)
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn hello(&mut self) -> UpstreamResult<Reply> {
        let ehlo = format!("EHLO {}", self.settings.local_name);
        let response = self.exchange(&ehlo).await?;

        if response.code == u16::from(Status::Ok) {
            self.capabilities = Capabilities::parse(response.lines.iter().skip(1).map(String::as_str));
            let first = response.lines.into_iter().take(1).collect();
            return Ok(Response::new(response.code, first).into_reply());
        }

        if response.code >= 500 {
            let helo = format!("HELO {}", self.settings.local_name);
            let response = self.exchange(&helo).await?;
            self.capabilities.clear();
            return check(250, response);
        }

        Err(UpstreamError::Rejected(response.into_reply()))
    }

    async fn starttls(&mut self) -> UpstreamResult<Reply> {
        if self.is_tls() {
            return Err(UpstreamError::Tls("Connection is already TLS".to_string()));
        }

        let response = self.exchange("STARTTLS").await?;
        let reply = check(220, response)?;

        let connection = self
            .connection
            .take()
            .ok_or(UpstreamError::ConnectionClosed)?;
        // Anything read past the 220 arrived before the handshake.
        self.buffer_pos = 0;

        let limit = self.settings.timeouts.connect();
        let upgraded = tokio::time::timeout(
            limit,
            connection.upgrade(&self.settings.server_name, self.settings.accept_invalid_certs),
        )
        .await
        .map_err(|_| UpstreamError::Timeout(limit.as_secs()))??;

        self.connection = Some(upgraded);
        self.capabilities.clear();
        self.hello().await?;

        Ok(reply)
    }

    async fn command(&mut self, expect: u16, line: &str) -> UpstreamResult<Reply> {
        let response = self.exchange(line).await?;
        check(expect, response)
    }

    async fn data(&mut self) -> UpstreamResult<(Self::Writer, Reply)> {
        let reply = self.command(354, "DATA").await?;
        self.data_reply = None;

        let connection = self
            .connection
            .take()
            .ok_or(UpstreamError::ConnectionClosed)?;

        outgoing!("{} <message body>", marker(connection.is_tls(), true));
        Ok((DataWriter::new(connection), reply))
    }

    async fn finish_data(&mut self, writer: Self::Writer) -> UpstreamResult<Reply> {
        let connection = within(self.settings.timeouts.write(), writer.finish()).await?;
        self.connection = Some(connection);

        let result = match self.read_response().await {
            Ok(response) => check(250, response),
            Err(err) => Err(err),
        };

        self.data_reply = Some(match &result {
            Ok(reply) | Err(UpstreamError::Rejected(reply)) => reply.clone(),
            Err(err) => Reply::unset(err.to_string()),
        });

        result
    }

    fn data_reply(&self) -> Option<&Reply> {
        self.data_reply.as_ref()
    }

    fn disconnect(&mut self) {
        self.connection = None;
        self.buffer_pos = 0;
    }

    async fn quit(&mut self) -> UpstreamResult<()> {
        if self.connection.is_none() {
            return Ok(());
        }

        let result = self.exchange("QUIT").await.map(|_| ());
        self.disconnect();
        result
    }
}
