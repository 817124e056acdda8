//! The body sink handed out for the DATA phase.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::connection::ClientConnection;

/// Writes a message body to the relay in DATA encoding.
///
/// Bare LF becomes CRLF and a `.` at the start of a line is doubled.
/// [`DataWriter::finish`] terminates the body with `.` on a line of its own
/// and hands the connection back.
#[derive(Debug)]
pub struct DataWriter<S = ClientConnection> {
    inner: S,
    pending: Vec<u8>,
    at_line_start: bool,
    last_cr: bool,
}

impl<S: AsyncWrite + Unpin> DataWriter<S> {
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            at_line_start: true,
            last_cr: false,
        }
    }

    fn stuff(&mut self, buf: &[u8]) {
        self.pending.reserve(buf.len() + buf.len() / 32);

        for &byte in buf {
            match byte {
                b'\n' if !self.last_cr => self.pending.extend_from_slice(b"\r\n"),
                b'.' if self.at_line_start => self.pending.extend_from_slice(b".."),
                _ => self.pending.push(byte),
            }

            self.at_line_start = byte == b'\n';
            self.last_cr = byte == b'\r';
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let written = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if written == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.drain(..written);
        }

        Poll::Ready(Ok(()))
    }

    /// Write the end-of-data marker and return the underlying stream.
    ///
    /// # Errors
    ///
    /// Fails if the buffered body or the marker cannot be written.
    pub async fn finish(mut self) -> io::Result<S> {
        if !self.at_line_start {
            self.pending.extend_from_slice(b"\r\n");
        }
        self.pending.extend_from_slice(b".\r\n");

        self.flush().await?;
        Ok(self.inner)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DataWriter<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;

        this.stuff(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    /// Flushes only; the relay connection stays open for the verdict.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    use super::DataWriter;

    async fn encode(pieces: &[&[u8]]) -> String {
        let mut writer = DataWriter::new(Vec::new());
        for piece in pieces {
            writer.write_all(piece).await.unwrap();
        }
        String::from_utf8(writer.finish().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_terminator() {
        assert_eq!(encode(&[b"Subject: x\r\n\r\nbody\r\n"]).await, "Subject: x\r\n\r\nbody\r\n.\r\n");
        assert_eq!(encode(&[b"no newline"]).await, "no newline\r\n.\r\n");
        assert_eq!(encode(&[]).await, ".\r\n");
    }

    #[tokio::test]
    async fn test_dot_stuffing() {
        assert_eq!(
            encode(&[b".starts\r\nmid.dle\r\n.\r\n..two\r\n"]).await,
            "..starts\r\nmid.dle\r\n..\r\n...two\r\n.\r\n"
        );
    }

    #[tokio::test]
    async fn test_bare_lf_normalised() {
        assert_eq!(encode(&[b"a\nb\r\nc\n"]).await, "a\r\nb\r\nc\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_state_spans_writes() {
        assert_eq!(
            encode(&[b"line\r", b"\n", b".", b"dot\n", b"\n."]).await,
            "line\r\n..dot\r\n\r\n..\r\n.\r\n"
        );
    }
}
