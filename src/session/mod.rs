//! The per-connection bridge between a client and the relay.
//!
//! The protocol engine in [`crate::server`] frames client commands and
//! calls one [`Phases`] operation per command. [`Session`] implements those
//! operations by driving an [`Upstream`](crate::upstream::Upstream), and
//! [`Backend`] creates one session per accepted connection.

mod backend;
mod bridge;

use core::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub use self::{backend::Backend, bridge::Session};
use crate::{error::PhaseResult, status::Reply, upstream::Capabilities};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloKind {
    Helo,
    Ehlo,
}

impl Display for HelloKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
        })
    }
}

/// Where a session stands with its relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not yet greeted.
    Unconnected,
    PlaintextUpstream,
    SecureUpstream,
    /// Terminal: every phase is refused without contacting the relay.
    Blocked,
}

/// The relay's answer to a hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub capabilities: Capabilities,
    pub reply: Reply,
}

/// One operation per bridged SMTP phase.
///
/// On success each returns the relay's reply; on failure a
/// [`Rejection`](crate::error::Rejection) holding the reply the client is
/// to receive.
#[async_trait]
pub trait Phases: Send {
    type Writer: AsyncWrite + Unpin + Send;

    async fn greet(&mut self, kind: HelloKind) -> PhaseResult<Greeting>;

    async fn start_tls(&mut self) -> PhaseResult;

    async fn auth(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult;

    async fn mail(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult;

    async fn rcpt(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult;

    async fn reset(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult;

    async fn quit(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult;

    async fn unknown(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult;

    /// DATA: a sink for the body, and the relay's reply to the command.
    async fn data_command(&mut self) -> PhaseResult<(Self::Writer, Reply)>;

    /// Transcode the body from `reader` into `writer` and return the
    /// relay's verdict on the message.
    async fn data<R>(&mut self, reader: &mut R, writer: Self::Writer) -> PhaseResult
    where
        R: AsyncRead + Unpin + Send;

    /// Release the relay connection. Safe to call more than once.
    async fn close(&mut self);
}
