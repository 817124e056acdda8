//! Error types for the proxy.
//!
//! Each layer has its own enum: the upstream leg ([`UpstreamError`]), the
//! body transcoder ([`MimeError`]), the bridge ([`ProxyError`]), startup
//! configuration ([`ConfigError`]) and the inbound protocol engine
//! ([`SessionError`]). A failed phase surfaces to the protocol engine as a
//! [`Rejection`]: the reply the client should see plus the cause.

use std::io;

use thiserror::Error;

use crate::status::Reply;

/// Errors that can occur on the connection to the upstream relay.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TLS negotiation or configuration failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Failed to parse an SMTP response from the relay.
    #[error("Failed to parse SMTP response: {0}")]
    Parse(String),

    /// The relay answered with a reply the phase does not accept.
    #[error("{0}")]
    Rejected(Reply),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// A read or write did not complete in time.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// A body operation was attempted outside of a DATA transaction.
    #[error("No DATA transaction in progress")]
    NotInData,
}

impl From<std::str::Utf8Error> for UpstreamError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<tokio_rustls::rustls::Error> for UpstreamError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

/// Specialized `Result` type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors that can occur while transcoding a message body.
#[derive(Debug, Error)]
pub enum MimeError {
    /// The header block or a MIME structure could not be parsed.
    #[error("Failed to parse message: {0}")]
    Parse(#[from] mailparse::MailParseError),

    /// Reading the client stream or writing the upstream stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Nested parts went deeper than the configured limit.
    #[error("MIME nesting exceeds {depth} levels")]
    TooDeep { depth: usize },
}

/// Errors raised by the bridge while servicing a phase.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Mime(#[from] MimeError),

    /// The session is blocked by the upstream TLS policy.
    #[error("{0}")]
    Blocked(String),
}

/// A phase that did not succeed: what the client is told, and why.
#[derive(Debug, Error)]
#[error("{reply}")]
pub struct Rejection {
    pub reply: Reply,
    #[source]
    pub source: ProxyError,
}

impl Rejection {
    #[must_use]
    pub const fn new(reply: Reply, source: ProxyError) -> Self {
        Self { reply, source }
    }

    /// Returns `true` if the session refused the phase without asking the relay.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self.source, ProxyError::Blocked(_))
    }
}

/// Specialized `Result` type for a single bridged phase.
pub type PhaseResult<T = Reply> = Result<T, Rejection>;

/// Errors that can occur while loading startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// A configuration value is invalid.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Failed to load TLS certificate.
    #[error("Failed to load TLS certificate from {path}: {reason}")]
    CertificateLoad { path: String, reason: String },

    /// Failed to load TLS private key.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// Rustls library error.
    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for ConfigError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// Errors that end an inbound client connection.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Protocol error occurred during session.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection error occurred.
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// Inbound TLS upgrade failed.
    #[error("TLS upgrade failed: {0}")]
    Tls(String),

    /// Session timed out.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),

    /// Shutdown signal received.
    #[error("Shutdown requested")]
    Shutdown,
}

impl SessionError {
    /// Returns `true` if the error indicates a graceful shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}
