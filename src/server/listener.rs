use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::net::TcpListener;

use super::{Context, engine};
use crate::{
    controller::{SHUTDOWN_BROADCAST, Signal},
    internal,
};

/// Pause after a failed accept so a persistent error such as running out of
/// file descriptors does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Listener {
    listener: TcpListener,
    context: Arc<Context>,
}

impl Listener {
    /// Bind the configured listen address.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(context: Arc<Context>) -> io::Result<Self> {
        let listener = TcpListener::bind(context.config().listen.as_str()).await?;

        Ok(Self { listener, context })
    }

    /// # Errors
    ///
    /// Fails if the socket address cannot be determined.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a shutdown signal, then wait for the open
    /// sessions to finish.
    ///
    /// # Errors
    ///
    /// Fails if the local address cannot be read or the shutdown broadcast
    /// has no receivers left.
    pub async fn serve(self) -> anyhow::Result<()> {
        internal!("Listener::serve");
        let mut sessions = Vec::default();
        let address = self.local_addr()?;

        let mut receiver = SHUTDOWN_BROADCAST.subscribe();

        loop {
            tokio::select! {
                sig = receiver.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown)) {
                        internal!(level = INFO, "SMTP Listener {address} Received Shutdown signal, finishing sessions ...");
                        join_all(sessions).await;
                        SHUTDOWN_BROADCAST.send(Signal::Finalised)?;
                        break;
                    }
                }

                (stream, peer) = accept_next(|| self.listener.accept()) => {
                    tracing::debug!("Connection received from {peer}");

                    sessions.retain(|session: &tokio::task::JoinHandle<()>| !session.is_finished());

                    let context = Arc::clone(&self.context);
                    sessions.push(tokio::spawn(async move {
                        match engine::handle(stream, peer, context).await {
                            Err(err) if err.is_shutdown() => {
                                tracing::debug!("Session with {peer} ended by shutdown");
                            }
                            Err(err) => internal!(level = WARN, "Session with {peer} ended: {err}"),
                            Ok(()) => {}
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}

/// Keep calling `accept` until it yields a connection. Failures belong to the
/// connection that caused them, so they are logged and never end the listener.
async fn accept_next<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                internal!(level = WARN, "Failed to accept connection: {err}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
