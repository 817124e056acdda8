use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::broadcast::{self, error::RecvError},
};

use super::{
    Context,
    body::Body,
    channel::Channel,
    command::Command,
};
use crate::{
    controller::{SHUTDOWN_BROADCAST, Signal},
    error::{PhaseResult, SessionError},
    internal,
    session::{Greeting, HelloKind, Phases},
    status::{EnhancedCode, Reply, Status},
};

/// Relay capabilities that are never re-advertised to the client.
const HIDDEN_CAPABILITIES: [&str; 3] = ["STARTTLS", "CHUNKING", "PIPELINING"];

/// Serve one client connection: dial the relay, then bridge commands until
/// either side goes away.
///
/// # Errors
///
/// Fails on a transport error or timeout on the client leg.
pub async fn handle(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<Context>,
) -> Result<(), SessionError> {
    internal!("Connected to {peer}");

    let shutdown = SHUTDOWN_BROADCAST.subscribe();
    let mut channel = Channel::new(
        stream,
        peer,
        context.config().timeouts,
        context.transcript.clone(),
    );

    let result = match context.backend.init().await {
        Ok(session) => {
            Engine::new(session, Arc::clone(&context))
                .run(channel, shutdown)
                .await
        }
        Err(err) => {
            internal!(level = WARN, "Unable to reach upstream for {peer}: {err}");
            channel
                .send(
                    &Reply::of(
                        Status::Unavailable,
                        format!("{} upstream unavailable", context.domain),
                    )
                    .with_enhanced(EnhancedCode::new(4, 4, 1)),
                )
                .await
        }
    };

    internal!("Connection from {peer} closed");
    result
}

async fn respond<S>(channel: &mut Channel<S>, result: PhaseResult) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match result {
        Ok(reply) => channel.send(&reply).await,
        Err(rejection) => {
            tracing::debug!("{}: {}", channel.peer(), rejection.source);
            channel.reject(&rejection).await
        }
    }
}

/// Resolves once the process is shutting down.
async fn shutdown_requested(receiver: &mut broadcast::Receiver<Signal>) {
    loop {
        match receiver.recv().await {
            Ok(Signal::Shutdown) | Err(RecvError::Closed) => return,
            Ok(Signal::Finalised) | Err(RecvError::Lagged(_)) => {}
        }
    }
}

/// The inbound protocol loop for one client, driving a set of [`Phases`].
pub struct Engine<P> {
    phases: P,
    context: Arc<Context>,
}

impl<P: Phases> Engine<P> {
    pub const fn new(phases: P, context: Arc<Context>) -> Self {
        Self { phases, context }
    }

    /// Greet the client and serve it until it quits, disconnects or the
    /// process shuts down. The relay connection is released however the
    /// loop ends.
    ///
    /// # Errors
    ///
    /// Fails on a transport error or timeout on the client leg, and with
    /// [`SessionError::Shutdown`] when a shutdown interrupts the session.
    pub async fn run<S>(
        mut self,
        channel: Channel<S>,
        shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let result = self.serve(channel, shutdown).await;
        self.phases.close().await;
        result
    }

    async fn serve<S>(
        &mut self,
        mut channel: Channel<S>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        channel
            .send(&Reply::of(
                Status::ServiceReady,
                format!("{} ESMTP Service Ready", self.context.domain),
            ))
            .await?;

        loop {
            let read = tokio::select! {
                line = channel.read_line() => Some(line),
                () = shutdown_requested(&mut shutdown) => None,
            };

            let Some(read) = read else {
                channel
                    .send(
                        &Reply::of(
                            Status::Unavailable,
                            format!("{} Service shutting down", self.context.domain),
                        )
                        .with_enhanced(EnhancedCode::new(4, 3, 2)),
                    )
                    .await?;
                return Err(SessionError::Shutdown);
            };

            let Some(line) = read? else {
                return Ok(());
            };

            match Command::from(line.as_str()) {
                Command::Helo(kind, id) => self.hello(&mut channel, kind, &id).await?,
                Command::StartTls => channel = self.start_tls(channel).await?,
                Command::Auth(arg) => self.auth(&mut channel, &arg).await?,
                Command::Mail(arg) => {
                    let result = self.phases.mail(250, "MAIL", &arg).await;
                    respond(&mut channel, result).await?;
                }
                Command::Rcpt(arg) => {
                    let result = self.phases.rcpt(25, "RCPT", &arg).await;
                    respond(&mut channel, result).await?;
                }
                Command::Rset => {
                    let result = self.phases.reset(250, "RSET", "").await;
                    respond(&mut channel, result).await?;
                }
                Command::Data => self.data(&mut channel).await?,
                Command::Quit => {
                    let result = self.phases.quit(221, "QUIT", "").await;
                    return respond(&mut channel, result).await;
                }
                Command::Other { verb, arg } => {
                    let result = self.phases.unknown(0, &verb, &arg).await;
                    respond(&mut channel, result).await?;
                }
            }
        }
    }

    fn hello_reply(&self, kind: HelloKind, id: &str, greeting: &Greeting, inbound_tls: bool) -> Reply {
        let mut lines = vec![format!("{} Hello {id}", self.context.domain)];

        if kind == HelloKind::Ehlo {
            lines.extend(
                greeting
                    .capabilities
                    .iter()
                    .filter(|(keyword, _)| !HIDDEN_CAPABILITIES.contains(keyword))
                    .map(|(keyword, params)| {
                        if params.is_empty() {
                            keyword.to_string()
                        } else {
                            format!("{keyword} {params}")
                        }
                    }),
            );

            if self.context.tls.is_some() && !inbound_tls {
                lines.push(String::from("STARTTLS"));
            }
        }

        Reply::of(Status::Ok, lines.join("\n"))
    }

    async fn hello<S>(
        &mut self,
        channel: &mut Channel<S>,
        kind: HelloKind,
        id: &str,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if id.is_empty() {
            return channel
                .send(
                    &Reply::new(501, format!("Syntax: {kind} hostname"))
                        .with_enhanced(EnhancedCode::new(5, 5, 4)),
                )
                .await;
        }

        match self.phases.greet(kind).await {
            Ok(greeting) => {
                let reply = self.hello_reply(kind, id, &greeting, channel.is_tls());
                channel.send(&reply).await
            }
            Err(rejection) => channel.reject(&rejection).await,
        }
    }

    async fn start_tls<S>(&mut self, mut channel: Channel<S>) -> Result<Channel<S>, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(acceptor) = self.context.tls.as_ref().map(|tls| tls.acceptor.clone()) else {
            channel
                .send(
                    &Reply::of(Status::NotImplemented, "STARTTLS not available")
                        .with_enhanced(EnhancedCode::new(5, 5, 1)),
                )
                .await?;
            return Ok(channel);
        };

        if channel.is_tls() {
            channel
                .send(
                    &Reply::of(Status::InvalidCommandSequence, "TLS already active")
                        .with_enhanced(EnhancedCode::new(5, 5, 1)),
                )
                .await?;
            return Ok(channel);
        }

        match self.phases.start_tls().await {
            Ok(reply) => {
                channel.send(&reply).await?;
                channel.upgrade(&acceptor).await
            }
            Err(rejection) => {
                channel.reject(&rejection).await?;
                Ok(channel)
            }
        }
    }

    /// AUTH, relaying `334` challenges and the client's answers until the
    /// relay gives a final reply.
    async fn auth<S>(&mut self, channel: &mut Channel<S>, arg: &str) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut result = self.phases.auth(0, "AUTH", arg).await;

        loop {
            match result {
                Ok(reply) if reply.status() == Status::AuthContinue => {
                    channel.send(&reply).await?;

                    let Some(answer) = channel.read_line().await? else {
                        return Ok(());
                    };
                    result = self.phases.auth(0, &answer, "").await;
                }
                other => return respond(channel, other).await,
            }
        }
    }

    async fn data<S>(&mut self, channel: &mut Channel<S>) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (writer, reply) = match self.phases.data_command().await {
            Ok(accepted) => accepted,
            Err(rejection) => return channel.reject(&rejection).await,
        };

        channel.send(&reply).await?;

        match channel.read_body(self.context.config().max_message_size).await? {
            Body::Complete(body) => {
                let result = self.phases.data(&mut body.as_slice(), writer).await;
                respond(channel, result).await
            }
            Body::TooLarge { size } => {
                // Without a terminator the relay drops the transaction.
                drop(writer);
                internal!(
                    level = WARN,
                    "{}: message of {size} bytes exceeds the limit",
                    channel.peer()
                );

                channel
                    .send(
                        &Reply::of(
                            Status::ExceededStorage,
                            "Message exceeds fixed maximum message size",
                        )
                        .with_enhanced(EnhancedCode::new(5, 3, 4)),
                    )
                    .await
            }
        }
    }
}
