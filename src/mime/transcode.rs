//! Re-serialises a message on its way upstream.
//!
//! Every header is re-emitted, `multipart/*` bodies are rebuilt under their
//! original boundary, embedded messages are transcoded as messages of their
//! own, and HTML leaves are re-encoded as quoted-printable. Everything else
//! is copied byte for byte.

use std::borrow::Cow;

use base64::{Engine, engine::general_purpose::STANDARD};
use futures_util::{FutureExt, future::BoxFuture};
use quoted_printable::ParseMode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{MimeNode, Payload, TransferEncoding};
use crate::error::MimeError;

/// Written once at the top of every multipart body.
pub const MULTIPART_PREAMBLE: &str = "This is a multi-part message in MIME format.\r\n";

const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";

#[derive(Debug, Clone, Copy)]
pub struct Transcoder {
    max_depth: usize,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Transcoder {
    #[must_use]
    pub const fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Read a complete message from `reader` and write its transcoded form
    /// to `writer`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Fails on a read or write error or if the message cannot be parsed.
    /// Output already written is not retracted.
    pub async fn transcode<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<usize, MimeError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).await?;

        self.transcode_bytes(&raw, writer).await
    }

    /// As [`Transcoder::transcode`], for a message already in memory.
    ///
    /// # Errors
    ///
    /// Fails on a write error or if the message cannot be parsed.
    pub async fn transcode_bytes<W>(&self, raw: &[u8], writer: &mut W) -> Result<usize, MimeError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let node = MimeNode::parse(raw, self.max_depth)?;

        let mut sink = Sink::new(writer);
        let outcome = emit_entity(&node, &mut sink).await;
        tracing::debug!("Transcoded {} bytes into {} bytes", raw.len(), sink.written);

        outcome.map(|()| sink.written)
    }
}

/// Counts what goes through.
struct Sink<W> {
    inner: W,
    written: usize,
}

impl<W: AsyncWrite + Unpin + Send> Sink<W> {
    const fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
        }
    }

    async fn put(&mut self, bytes: &[u8]) -> Result<(), MimeError> {
        if bytes.is_empty() {
            return Ok(());
        }

        self.inner.write_all(bytes).await?;
        self.written += bytes.len();
        Ok(())
    }
}

fn emit_entity<'a, 'm: 'a, W>(
    node: &'a MimeNode<'m>,
    sink: &'a mut Sink<W>,
) -> BoxFuture<'a, Result<(), MimeError>>
where
    W: AsyncWrite + Unpin + Send + 'a,
{
    async move {
        emit_headers(node, sink).await?;
        sink.put(b"\r\n").await?;

        match &node.payload {
            Payload::Leaf(body) if node.is_html() => {
                let decoded = decode_html(node, body);
                sink.put(&quoted_printable::encode(crlf_lines(&decoded).as_ref()))
                    .await
            }
            Payload::Leaf(body) => sink.put(body).await,
            Payload::Message(inner) => emit_entity(inner, sink).await,
            Payload::Multipart { boundary, parts } => {
                sink.put(MULTIPART_PREAMBLE.as_bytes()).await?;

                for part in parts {
                    sink.put(format!("--{boundary}\r\n").as_bytes()).await?;
                    emit_entity(part, sink).await?;
                    sink.put(b"\r\n").await?;
                }

                sink.put(format!("--{boundary}--\r\n").as_bytes()).await
            }
        }
    }
    .boxed()
}

async fn emit_headers<W>(node: &MimeNode<'_>, sink: &mut Sink<W>) -> Result<(), MimeError>
where
    W: AsyncWrite + Unpin + Send,
{
    let html = node.is_html();
    let mut declared = false;

    for header in &node.headers {
        if html && header.is(CONTENT_TRANSFER_ENCODING) {
            if !declared {
                sink.put(format!("{CONTENT_TRANSFER_ENCODING}: quoted-printable\r\n").as_bytes())
                    .await?;
                declared = true;
            }
            continue;
        }

        sink.put(header.name.as_bytes()).await?;
        sink.put(b": ").await?;
        sink.put(&header.value).await?;
        sink.put(b"\r\n").await?;
    }

    if html && !declared {
        sink.put(format!("{CONTENT_TRANSFER_ENCODING}: quoted-printable\r\n").as_bytes())
            .await?;
    }

    Ok(())
}

/// Turn bare LF line breaks into CRLF so the encoder keeps them as breaks.
fn crlf_lines(body: &[u8]) -> Cow<'_, [u8]> {
    let bare = body
        .iter()
        .enumerate()
        .any(|(ix, &b)| b == b'\n' && (ix == 0 || body[ix - 1] != b'\r'));
    if !bare {
        return Cow::Borrowed(body);
    }

    let mut out = Vec::with_capacity(body.len() + body.len() / 32);
    for (ix, &b) in body.iter().enumerate() {
        if b == b'\n' && (ix == 0 || body[ix - 1] != b'\r') {
            out.push(b'\r');
        }
        out.push(b);
    }
    Cow::Owned(out)
}

/// Decode an HTML body according to its declared transfer encoding.
///
/// Bodies that do not decode cleanly, and unknown encodings, are used as is.
fn decode_html<'b>(node: &MimeNode<'_>, body: &'b [u8]) -> Cow<'b, [u8]> {
    match &node.encoding {
        TransferEncoding::Base64 => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();

            match STANDARD.decode(compact) {
                Ok(decoded) => Cow::Owned(decoded),
                Err(err) => {
                    tracing::warn!("Invalid base64 in text/html part, re-encoding as is: {err}");
                    Cow::Borrowed(body)
                }
            }
        }
        TransferEncoding::QuotedPrintable => {
            match quoted_printable::decode(body, ParseMode::Robust) {
                Ok(decoded) => Cow::Owned(decoded),
                Err(err) => {
                    tracing::warn!(
                        "Invalid quoted-printable in text/html part, re-encoding as is: {err}"
                    );
                    Cow::Borrowed(body)
                }
            }
        }
        TransferEncoding::Absent
        | TransferEncoding::SevenBit
        | TransferEncoding::EightBit
        | TransferEncoding::Binary => Cow::Borrowed(body),
        TransferEncoding::Other(encoding) => {
            tracing::warn!("Unknown Content-Transfer-Encoding {encoding:?} on text/html, not decoding");
            Cow::Borrowed(body)
        }
    }
}
