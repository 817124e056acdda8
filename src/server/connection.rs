use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::{TlsAcceptor, server::TlsStream};

/// The client leg, before or after STARTTLS.
pub enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    Plain(Stream),
    Tls(Box<TlsStream<Stream>>),
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Perform the server side of the TLS handshake.
    ///
    /// # Errors
    ///
    /// Fails if the handshake does not complete, or the connection is
    /// already encrypted.
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> io::Result<Self> {
        tracing::debug!("Upgrading connection ...");

        match self {
            Self::Plain(stream) => {
                let stream = acceptor.accept(stream).await?;

                let (_, session) = stream.get_ref();
                tracing::debug!(
                    "Connection upgraded with {:?} / {:?}",
                    session.protocol_version(),
                    session.negotiated_cipher_suite().map(|suite| suite.suite())
                );

                Ok(Self::Tls(Box::new(stream)))
            }
            Self::Tls(_) => Err(io::Error::other("connection is already encrypted")),
        }
    }
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> AsyncRead for Connection<Stream> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> AsyncWrite for Connection<Stream> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}
