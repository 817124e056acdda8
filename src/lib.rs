#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

//! A transparent SMTP proxy.
//!
//! Clients talk to the proxy as if it were their relay. Each command is
//! forwarded to the configured upstream relay and its reply handed back,
//! with the upstream leg secured by STARTTLS according to a
//! [`config::TlsPolicy`]. Message bodies pass through the
//! [`mime::Transcoder`], which re-encodes HTML parts as quoted-printable.

pub mod config;
pub mod controller;
pub mod error;
pub mod linesplit;
pub mod logging;
pub mod mime;
pub mod server;
pub mod session;
pub mod status;
pub mod translate;
pub mod upstream;

pub use tracing;
