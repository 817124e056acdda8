//! Proxy configuration.
//!
//! A [`ProxyConfig`] is read from TOML (every field has a default) and then
//! overridden from the command line. Once the listener starts it is shared
//! read-only by every session.

pub mod timeouts;
pub mod tls;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use self::{
    timeouts::Timeouts,
    tls::{InboundTls, TlsContext, TlsPolicy, UpstreamTls},
};
use crate::{
    error::ConfigError,
    status::{EnhancedCode, Reply},
};

/// The reply every phase of a blocked session receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResponse {
    pub code: u16,
    pub enhanced: EnhancedCode,
    pub message: String,
}

impl Default for BlockResponse {
    fn default() -> Self {
        Self {
            code: 500,
            enhanced: EnhancedCode::new(5, 0, 0),
            message: String::from("Unable to handle messages at the moment, sorry"),
        }
    }
}

impl BlockResponse {
    #[must_use]
    pub fn reply(&self) -> Reply {
        Reply::new(self.code, self.message.clone()).with_enhanced(self.enhanced)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Inbound listen address.
    pub listen: String,
    /// The relay every session is forwarded to, as `host:port`.
    pub upstream: String,
    /// Log bridge diagnostics at INFO rather than TRACE.
    pub verbose: bool,
    /// Name used in the banner, the EHLO reply and the upstream EHLO.
    pub domain: Option<String>,
    pub upstream_tls: UpstreamTls,
    /// Certificate offered to clients. Without one, STARTTLS is not offered.
    pub tls: Option<InboundTls>,
    /// Append a `C:`/`S:` transcript of every session to this file.
    pub server_debug: Option<PathBuf>,
    pub block: BlockResponse,
    pub timeouts: Timeouts,
    /// Largest DATA body accepted from a client, in bytes.
    pub max_message_size: usize,
    /// Deepest multipart / embedded message nesting the transcoder accepts.
    pub max_mime_depth: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: String::from("localhost:587"),
            upstream: String::from("smtp.sparkpostmail.com:587"),
            verbose: false,
            domain: None,
            upstream_tls: UpstreamTls::default(),
            tls: None,
            server_debug: None,
            block: BlockResponse::default(),
            timeouts: Timeouts::default(),
            max_message_size: 25 * 1024 * 1024,
            max_mime_depth: 32,
        }
    }
}

impl ProxyConfig {
    /// Read a configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid TOML for this schema,
    /// or does not pass [`ProxyConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Fails if the upstream address has no port, or a limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if split_host_port(&self.upstream).is_none() {
            return Err(ConfigError::Invalid {
                field: "upstream",
                reason: format!("{:?} is not host:port", self.upstream),
            });
        }

        if self.listen.is_empty() {
            return Err(ConfigError::Invalid {
                field: "listen",
                reason: String::from("must not be empty"),
            });
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: String::from("must be greater than zero"),
            });
        }

        if self.max_mime_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_mime_depth",
                reason: String::from("must be greater than zero"),
            });
        }

        if !(400..600).contains(&self.block.code) {
            return Err(ConfigError::Invalid {
                field: "block.code",
                reason: format!("{} is not a 4xx or 5xx reply code", self.block.code),
            });
        }

        if u16::from(self.block.enhanced.class) != self.block.code / 100 {
            return Err(ConfigError::Invalid {
                field: "block.enhanced",
                reason: format!(
                    "{} does not match the class of reply code {}",
                    self.block.enhanced, self.block.code
                ),
            });
        }

        Ok(())
    }

    /// The upstream host name, used for SNI and certificate validation.
    #[must_use]
    pub fn upstream_host(&self) -> &str {
        split_host_port(&self.upstream).map_or(self.upstream.as_str(), |(host, _)| host)
    }

    /// The name this proxy announces: the configured domain, else the
    /// certificate's common name, else the machine's host name.
    #[must_use]
    pub fn identity(&self, tls: Option<&TlsContext>) -> String {
        self.domain
            .clone()
            .or_else(|| tls.and_then(|tls| tls.common_name.clone()))
            .or_else(|| {
                hostname::get()
                    .ok()
                    .and_then(|name| name.into_string().ok())
            })
            .unwrap_or_else(|| String::from("localhost"))
    }
}

/// Split `host:port`, accepting a bracketed IPv6 literal as the host.
fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    (!host.is_empty()).then_some((host, port))
}
