use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::{Greeting, HelloKind, Phases, SessionState};
use crate::{
    bridge,
    config::ProxyConfig,
    error::{PhaseResult, ProxyError, Rejection},
    logging::marker,
    mime::Transcoder,
    status::{EnhancedCode, Reply, Status},
    translate::reject,
    upstream::Upstream,
};

/// Bridges one client connection onto one relay connection.
pub struct Session<U> {
    config: Arc<ProxyConfig>,
    upstream: U,
    transcoder: Transcoder,
    greeted: bool,
    blocked: bool,
    closed: bool,
}

impl<U: Upstream> Session<U> {
    pub fn new(config: Arc<ProxyConfig>, upstream: U) -> Self {
        let transcoder = Transcoder::new(config.max_mime_depth);

        Self {
            config,
            upstream,
            transcoder,
            greeted: false,
            blocked: false,
            closed: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.blocked {
            SessionState::Blocked
        } else if !self.greeted {
            SessionState::Unconnected
        } else if self.upstream.is_tls() {
            SessionState::SecureUpstream
        } else {
            SessionState::PlaintextUpstream
        }
    }

    #[must_use]
    pub const fn upstream(&self) -> &U {
        &self.upstream
    }

    fn verbose(&self) -> bool {
        self.config.verbose
    }

    fn sending(&self) -> &'static str {
        marker(self.upstream.is_tls(), true)
    }

    fn receiving(&self) -> &'static str {
        marker(self.upstream.is_tls(), false)
    }

    fn blocked_reply(&self) -> Rejection {
        bridge!(self.verbose(), "\t{}", self.config.block.message);
        Rejection::new(
            self.config.block.reply(),
            ProxyError::Blocked(self.config.block.message.clone()),
        )
    }

    /// Enter the terminal blocked state because the relay leg could not be
    /// secured.
    fn block(&mut self, cause: &str) -> Rejection {
        self.blocked = true;
        tracing::warn!("Blocking session: {cause}");

        Rejection::new(
            self.config.block.reply(),
            ProxyError::Blocked(format!("{}: {cause}", self.config.block.message)),
        )
    }

    async fn passthru(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult {
        bridge!(self.verbose(), "{} {cmd} {arg}", self.sending());

        if self.blocked {
            return Err(self.blocked_reply());
        }

        let line = if arg.is_empty() {
            cmd.to_string()
        } else {
            format!("{cmd} {arg}")
        };

        match self.upstream.command(expect, &line).await {
            Ok(reply) => {
                bridge!(self.verbose(), "\t{} {reply}", self.receiving());
                Ok(reply)
            }
            Err(err) => {
                let rejection = reject(err);
                bridge!(self.verbose(), "\t{} {}", self.receiving(), rejection.reply);
                Err(rejection)
            }
        }
    }
}

#[async_trait]
impl<U: Upstream> Phases for Session<U> {
    type Writer = U::Writer;

    async fn greet(&mut self, kind: HelloKind) -> PhaseResult<Greeting> {
        bridge!(self.verbose(), "{} {kind}", self.sending());

        if self.blocked {
            return Err(self.blocked_reply());
        }

        let reply = match self.upstream.hello().await {
            Ok(reply) => reply,
            Err(err) => {
                bridge!(self.verbose(), "\t{} {kind} error {err}", self.receiving());
                return Err(reject(err));
            }
        };
        self.greeted = true;

        bridge!(self.verbose(), "\t{} {kind} success", self.receiving());
        bridge!(
            self.verbose(),
            "\tUpstream capabilities: {:?}",
            self.upstream.capabilities().lines().collect::<Vec<_>>()
        );

        if self.config.upstream_tls.is_required() && !self.upstream.is_tls() {
            bridge!(self.verbose(), "\tTrying immediate upstream STARTTLS");
            self.start_tls().await?;
        }

        Ok(Greeting {
            capabilities: self.upstream.capabilities().clone(),
            reply,
        })
    }

    async fn start_tls(&mut self) -> PhaseResult {
        if self.blocked {
            bridge!(self.verbose(), "{} STARTTLS", self.sending());
            return Err(self.blocked_reply());
        }

        if self.upstream.is_tls() {
            let reply = Reply::of(
                Status::ServiceReady,
                "Ready to start TLS, upstream is already secure",
            )
            .with_enhanced(EnhancedCode::new(2, 0, 0));
            bridge!(self.verbose(), "\t{} {reply}", self.receiving());
            return Ok(reply);
        }

        bridge!(self.verbose(), "{} STARTTLS", self.sending());

        let required = self.config.upstream_tls.is_required();

        if !self.upstream.capabilities().has("STARTTLS") {
            if required {
                return Err(self.block("relay does not offer STARTTLS"));
            }

            bridge!(self.verbose(), "\tRelay does not offer STARTTLS, continuing in plaintext");
            return Ok(
                Reply::of(Status::ServiceReady, "Ready to start TLS")
                    .with_enhanced(EnhancedCode::new(2, 0, 0)),
            );
        }

        match self.upstream.starttls().await {
            Ok(reply) => {
                bridge!(self.verbose(), "\t{} {reply}", self.receiving());
                Ok(reply)
            }
            Err(err) if required => Err(self.block(&err.to_string())),
            Err(err) => {
                bridge!(self.verbose(), "\t{} STARTTLS error {err}", self.receiving());
                Err(reject(err))
            }
        }
    }

    async fn auth(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult {
        self.passthru(expect, cmd, arg).await
    }

    async fn mail(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult {
        self.passthru(expect, cmd, arg).await
    }

    async fn rcpt(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult {
        self.passthru(expect, cmd, arg).await
    }

    async fn reset(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult {
        self.passthru(expect, cmd, arg).await
    }

    async fn quit(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult {
        let result = self.passthru(expect, cmd, arg).await;

        if !self.blocked {
            self.upstream.disconnect();
            self.closed = true;
        }

        result
    }

    async fn unknown(&mut self, expect: u16, cmd: &str, arg: &str) -> PhaseResult {
        self.passthru(expect, cmd, arg).await
    }

    async fn data_command(&mut self) -> PhaseResult<(Self::Writer, Reply)> {
        bridge!(self.verbose(), "{} DATA", self.sending());

        if self.blocked {
            return Err(self.blocked_reply());
        }

        self.upstream.data().await.map_err(|err| {
            bridge!(self.verbose(), "\t{} DATA error {err}", self.receiving());
            reject(err)
        })
    }

    async fn data<R>(&mut self, reader: &mut R, mut writer: Self::Writer) -> PhaseResult
    where
        R: AsyncRead + Unpin + Send,
    {
        let written = match self.transcoder.transcode(reader, &mut writer).await {
            Ok(written) => written,
            Err(err) => {
                bridge!(self.verbose(), "\t{} DATA transfer error {err}", self.receiving());
                return Err(Rejection::new(
                    Reply::unset(format!("DATA transfer error: {err}")),
                    err.into(),
                ));
            }
        };

        match self.upstream.finish_data(writer).await {
            Ok(reply) => {
                bridge!(
                    self.verbose(),
                    "\t{} DATA accepted ({written} bytes): {reply}",
                    self.receiving()
                );
                Ok(reply)
            }
            Err(err) => {
                bridge!(self.verbose(), "\t{} DATA close error {err}", self.receiving());
                Err(reject(err))
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(err) = self.upstream.quit().await {
            tracing::debug!("Error closing upstream connection: {err}");
        }
    }
}
