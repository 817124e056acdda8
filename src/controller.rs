use std::sync::{Arc, LazyLock};

use tokio::sync::broadcast;

use crate::{
    config::ProxyConfig,
    internal, logging,
    server::{Context, Listener},
};

pub struct Controller {
    config: ProxyConfig,
}

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let _ = tokio::signal::ctrl_c().await;
    internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(Signal::Finalised) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Controller {
    #[must_use]
    pub const fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Run the proxy until CTRL+C.
    ///
    /// # Errors
    ///
    /// This function will return an error if the inbound certificate cannot
    /// be loaded or the listen address cannot be bound.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let context = Arc::new(Context::from_config(self.config).await?);
        let listener = Listener::bind(Arc::clone(&context)).await?;

        internal!(
            level = INFO,
            "Listening on {} as {}, relaying to {} (upstream TLS {:?})",
            listener.local_addr()?,
            context.domain,
            context.config().upstream,
            context.config().upstream_tls.policy
        );

        tokio::select! {
            result = listener.serve() => result?,
            result = shutdown() => result?,
        };

        internal!("Shutting down...");

        Ok(())
    }
}
