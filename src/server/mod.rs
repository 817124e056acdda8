//! The client-facing SMTP server.
//!
//! [`Listener`] accepts connections and hands each one to
//! [`engine::handle`], which dials the relay through the shared
//! [`Backend`] and bridges the conversation command by command.

pub mod body;
pub mod channel;
pub mod command;
pub mod connection;
pub mod engine;
pub mod listener;
pub mod transcript;

use std::sync::Arc;

use anyhow::Context as _;

pub use self::{engine::Engine, listener::Listener, transcript::Transcript};
use crate::{
    config::{ProxyConfig, TlsContext},
    session::Backend,
};

/// Everything a connection needs, shared by all of them.
#[derive(Debug)]
pub struct Context {
    pub backend: Backend,
    /// Name used in the banner and the EHLO reply.
    pub domain: String,
    /// Inbound STARTTLS is offered only when this is set.
    pub tls: Option<TlsContext>,
    pub transcript: Option<Arc<Transcript>>,
}

impl Context {
    /// Load the inbound certificate and open the transcript, if configured.
    ///
    /// # Errors
    ///
    /// Fails if the certificate or key cannot be loaded, or the transcript
    /// file cannot be opened.
    pub async fn from_config(config: ProxyConfig) -> anyhow::Result<Self> {
        let tls = config.tls.as_ref().map(|tls| tls.load()).transpose()?;
        let domain = config.identity(tls.as_ref());

        let transcript = match &config.server_debug {
            Some(path) => Some(Arc::new(Transcript::open(path).await.with_context(|| {
                format!("Unable to open session transcript {}", path.display())
            })?)),
            None => None,
        };

        Ok(Self {
            backend: Backend::new(Arc::new(config), domain.as_str()),
            domain,
            tls,
            transcript,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        self.backend.config()
    }
}
