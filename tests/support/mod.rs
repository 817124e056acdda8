//! Test support: a scripted relay, a running proxy and a raw SMTP client.
#![allow(dead_code)] // Not every test binary uses every helper

use std::{net::SocketAddr, sync::Arc, time::Duration};

use empath_proxy::{
    config::ProxyConfig,
    server::{Context, Listener},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::RwLock,
    time::timeout,
};

/// What the relay saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A command line, without its line ending.
    Line(String),
    /// A DATA body, with dot-stuffing removed.
    Message(String),
}

#[derive(Clone)]
struct RelayConfig {
    greeting: (u16, String),
    /// `None` rejects EHLO so clients fall back to HELO.
    capabilities: Option<Vec<String>>,
    rejected_recipients: Vec<String>,
    starttls_response: (u16, String),
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            greeting: (220, String::from("relay.test ESMTP")),
            capabilities: Some(vec![
                String::from("SIZE 1000000"),
                String::from("PIPELINING"),
                String::from("8BITMIME"),
            ]),
            rejected_recipients: Vec::new(),
            starttls_response: (454, String::from("4.7.0 TLS not available")),
        }
    }
}

pub struct MockRelayBuilder {
    config: RelayConfig,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: &str) -> Self {
        self.config.greeting = (code, message.to_string());
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: &str) -> Self {
        if let Some(capabilities) = &mut self.config.capabilities {
            capabilities.push(capability.to_string());
        }
        self
    }

    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.config.capabilities = None;
        self
    }

    #[must_use]
    pub fn rejecting_recipient(mut self, address: &str) -> Self {
        self.config.rejected_recipients.push(address.to_string());
        self
    }

    pub async fn build(self) -> MockRelay {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Arc::new(self.config);
        let events = Arc::new(RwLock::new(Vec::new()));

        let accepted = Arc::clone(&events);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&config), Arc::clone(&accepted)));
            }
        });

        MockRelay { addr, events }
    }
}

/// A relay that answers from a fixed script and records what it receives.
pub struct MockRelay {
    addr: SocketAddr,
    events: Arc<RwLock<Vec<RelayEvent>>>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            config: RelayConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn events(&self) -> Vec<RelayEvent> {
        self.events.read().await.clone()
    }

    /// The command lines received, in order.
    pub async fn lines(&self) -> Vec<String> {
        self.events()
            .await
            .into_iter()
            .filter_map(|event| match event {
                RelayEvent::Line(line) => Some(line),
                RelayEvent::Message(_) => None,
            })
            .collect()
    }

    pub async fn messages(&self) -> Vec<String> {
        self.events()
            .await
            .into_iter()
            .filter_map(|event| match event {
                RelayEvent::Message(message) => Some(message),
                RelayEvent::Line(_) => None,
            })
            .collect()
    }

    /// Wait until `line` has been received, or give up after a second.
    pub async fn wait_for_line(&self, line: &str) -> bool {
        timeout(Duration::from_secs(1), async {
            loop {
                if self.lines().await.iter().any(|seen| seen == line) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

async fn serve(stream: TcpStream, config: Arc<RelayConfig>, events: Arc<RwLock<Vec<RelayEvent>>>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let (code, message) = &config.greeting;
    if write
        .write_all(format!("{code} {message}\r\n").as_bytes())
        .await
        .is_err()
        || *code >= 400
    {
        return;
    }

    let mut awaiting_auth = false;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }

        let line = line.trim_end().to_string();
        events.write().await.push(RelayEvent::Line(line.clone()));

        let upper = line.to_ascii_uppercase();
        let response = if awaiting_auth {
            awaiting_auth = false;
            String::from("235 2.7.0 Authentication successful\r\n")
        } else if upper.starts_with("EHLO") {
            match &config.capabilities {
                Some(capabilities) => {
                    let mut response = String::from("250-relay.test\r\n");
                    for (index, capability) in capabilities.iter().enumerate() {
                        let separator = if index == capabilities.len() - 1 { ' ' } else { '-' };
                        response.push_str(&format!("250{separator}{capability}\r\n"));
                    }
                    response
                }
                None => String::from("502 5.5.2 Command not recognised\r\n"),
            }
        } else if upper.starts_with("HELO") {
            String::from("250 relay.test\r\n")
        } else if upper.starts_with("STARTTLS") {
            let (code, message) = &config.starttls_response;
            format!("{code} {message}\r\n")
        } else if upper.starts_with("AUTH") {
            awaiting_auth = true;
            String::from("334 VXNlcm5hbWU6\r\n")
        } else if upper.starts_with("MAIL") {
            String::from("250 2.1.0 Ok\r\n")
        } else if upper.starts_with("RCPT") {
            if config
                .rejected_recipients
                .iter()
                .any(|address| upper.contains(&address.to_ascii_uppercase()))
            {
                String::from("550 5.1.1 No such user\r\n")
            } else {
                String::from("250 2.1.5 Ok\r\n")
            }
        } else if upper == "DATA" {
            if write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await.is_err() {
                return;
            }

            let mut message = String::new();
            loop {
                let mut body_line = String::new();
                if reader.read_line(&mut body_line).await.unwrap_or(0) == 0 {
                    return;
                }
                if body_line == ".\r\n" {
                    break;
                }
                message.push_str(body_line.strip_prefix('.').unwrap_or(&body_line));
            }

            events.write().await.push(RelayEvent::Message(message));
            String::from("250 2.0.0 Ok: queued as ABC123\r\n")
        } else if upper == "RSET" || upper == "NOOP" {
            String::from("250 2.0.0 Ok\r\n")
        } else if upper == "QUIT" {
            let _ = write.write_all(b"221 2.0.0 Bye\r\n").await;
            return;
        } else {
            String::from("502 5.5.2 Command not recognised\r\n")
        };

        if write.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Proxy settings pointing at `relay`, listening on an ephemeral port.
pub fn proxy_config(relay: SocketAddr) -> ProxyConfig {
    ProxyConfig {
        listen: String::from("127.0.0.1:0"),
        upstream: relay.to_string(),
        domain: Some(String::from("proxy.test")),
        ..ProxyConfig::default()
    }
}

/// Start a proxy and return the address it listens on.
pub async fn start_proxy(config: ProxyConfig) -> SocketAddr {
    let context = Arc::new(Context::from_config(config).await.unwrap());
    let listener = Listener::bind(context).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(listener.serve());
    addr
}

/// A bare SMTP client.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();

        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    /// Read one (possibly multi-line) reply. Empty once the server has
    /// closed the connection.
    pub async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let read = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a reply")
                .unwrap();

            if read == 0 {
                return lines;
            }

            let line = line.trim_end().to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);

            if last {
                return lines;
            }
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Send `line` and read the reply.
    pub async fn command(&mut self, line: &str) -> Vec<String> {
        self.send(line).await;
        self.reply().await
    }
}
