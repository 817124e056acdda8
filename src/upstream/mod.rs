//! The leg from the proxy to the relay.
//!
//! [`Upstream`] is the set of operations a session drives; [`UpstreamClient`]
//! implements it over TCP, with STARTTLS via rustls.

mod client;
mod connection;
mod data;
mod response;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

pub use self::{
    client::{ClientSettings, UpstreamClient},
    connection::ClientConnection,
    data::DataWriter,
    response::Response,
};
use crate::{error::UpstreamResult, status::Reply};

/// Extensions the relay advertised in its last EHLO reply, in the order it
/// listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(Vec<(String, String)>);

impl Capabilities {
    /// Parse the EHLO lines that follow the greeting line.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            lines
                .into_iter()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    let (keyword, params) = line.split_once(' ').unwrap_or((line, ""));
                    (keyword.to_ascii_uppercase(), params.trim().to_string())
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn has(&self, keyword: &str) -> bool {
        self.0.iter().any(|(k, _)| k.eq_ignore_ascii_case(keyword))
    }

    #[must_use]
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, params)| params.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Each capability as it appears on an EHLO line.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(|(keyword, params)| {
            if params.is_empty() {
                keyword.to_string()
            } else {
                format!("{keyword} {params}")
            }
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Whether a reply `code` satisfies `expect`.
///
/// `0` accepts anything, a single digit matches the class (`2` is any
/// 2xx), two digits match the first two digits (`25` is 250 to 259) and a
/// full code must match exactly.
#[must_use]
pub const fn accepts(expect: u16, code: u16) -> bool {
    match expect {
        0 => true,
        1..=9 => code / 100 == expect,
        10..=99 => code / 10 == expect,
        _ => code == expect,
    }
}

/// The phase-level operations a session performs against the relay.
///
/// Every operation either returns the relay's reply or an error carrying
/// the best structured reply available.
#[async_trait]
pub trait Upstream: Send {
    /// Body sink handed out for the DATA phase.
    type Writer: AsyncWrite + Unpin + Send;

    fn is_tls(&self) -> bool;

    fn capabilities(&self) -> &Capabilities;

    /// EHLO (falling back to HELO), refreshing [`Upstream::capabilities`].
    async fn hello(&mut self) -> UpstreamResult<Reply>;

    /// STARTTLS, the handshake, and a fresh EHLO over the secured leg.
    async fn starttls(&mut self) -> UpstreamResult<Reply>;

    /// Send one command line and check the reply against `expect`.
    async fn command(&mut self, expect: u16, line: &str) -> UpstreamResult<Reply>;

    /// DATA: the body sink plus the relay's `354` reply.
    async fn data(&mut self) -> UpstreamResult<(Self::Writer, Reply)>;

    /// Terminate the body and read the relay's verdict on the message.
    async fn finish_data(&mut self, writer: Self::Writer) -> UpstreamResult<Reply>;

    /// The verdict read by the last [`Upstream::finish_data`].
    fn data_reply(&self) -> Option<&Reply>;

    /// Drop the connection without a further exchange (after a relayed QUIT).
    fn disconnect(&mut self);

    /// QUIT and close. Safe to call any number of times.
    async fn quit(&mut self) -> UpstreamResult<()>;
}
