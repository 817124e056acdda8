use std::sync::Arc;

use super::Session;
use crate::{
    bridge,
    config::ProxyConfig,
    error::UpstreamResult,
    upstream::{ClientSettings, UpstreamClient},
};

/// Creates one [`Session`] per accepted client, each with its own relay
/// connection.
#[derive(Debug, Clone)]
pub struct Backend {
    config: Arc<ProxyConfig>,
    identity: Arc<str>,
}

impl Backend {
    /// `identity` is the name used in the upstream EHLO.
    pub fn new(config: Arc<ProxyConfig>, identity: impl Into<Arc<str>>) -> Self {
        Self {
            config,
            identity: identity.into(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Dial the relay and read its greeting.
    ///
    /// # Errors
    ///
    /// Fails if the relay cannot be reached in time or refuses the
    /// connection.
    pub async fn init(&self) -> UpstreamResult<Session<UpstreamClient>> {
        let verbose = self.config.verbose;
        bridge!(verbose, "---Connecting upstream {}", self.config.upstream);

        let settings = ClientSettings::from_config(&self.config, &*self.identity);

        match UpstreamClient::connect(&self.config.upstream, settings).await {
            Ok(client) => {
                bridge!(verbose, "\t<- {}", client.greeting());
                Ok(Session::new(Arc::clone(&self.config), client))
            }
            Err(err) => {
                bridge!(verbose, "\t<- connection error {err}");
                Err(err)
            }
        }
    }
}
