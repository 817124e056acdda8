//! MIME structure of a message body as it passes through the proxy.
//!
//! A message is parsed once into a tree of [`MimeNode`]s that borrow from
//! the raw bytes, then walked once by the [`transcode`] module to produce
//! the bytes sent upstream.

pub mod compose;
pub mod transcode;

use std::collections::BTreeMap;

use mailparse::MailHeaderMap;

use crate::error::MimeError;

pub use transcode::Transcoder;

/// Declared `Content-Transfer-Encoding` of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// No `Content-Transfer-Encoding` header.
    #[default]
    Absent,
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    /// Anything else, kept verbatim (lower-cased).
    Other(String),
}

impl TransferEncoding {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" => Self::Absent,
            "7bit" => Self::SevenBit,
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A header field exactly as it appeared on the wire, minus the colon
/// and the whitespace that follows it. Folded values keep their line breaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

impl Header {
    fn from_parsed(header: &mailparse::MailHeader<'_>) -> Self {
        let raw = header.get_value_raw();
        let start = raw
            .iter()
            .position(|b| !matches!(b, b' ' | b'\t'))
            .unwrap_or(raw.len());

        Self {
            name: header.get_key(),
            value: raw[start..].to_vec(),
        }
    }

    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// The content of one entity.
#[derive(Debug)]
pub enum Payload<'a> {
    /// Raw, still-encoded body bytes.
    Leaf(&'a [u8]),
    /// Children of a `multipart/*` entity, in order.
    Multipart {
        boundary: String,
        parts: Vec<MimeNode<'a>>,
    },
    /// A complete embedded `message/rfc822`.
    Message(Box<MimeNode<'a>>),
}

/// One entity of a message: its headers, content type and content.
#[derive(Debug)]
pub struct MimeNode<'a> {
    pub media_type: String,
    pub params: BTreeMap<String, String>,
    pub encoding: TransferEncoding,
    pub headers: Vec<Header>,
    pub payload: Payload<'a>,
}

impl<'a> MimeNode<'a> {
    /// Parse `raw` (header block, blank line, body) into a tree.
    ///
    /// # Errors
    ///
    /// Fails if a header block cannot be parsed or the nesting of
    /// multiparts and embedded messages exceeds `max_depth`.
    pub fn parse(raw: &'a [u8], max_depth: usize) -> Result<Self, MimeError> {
        Self::parse_at(raw, 0, max_depth)
    }

    fn parse_at(raw: &'a [u8], depth: usize, max_depth: usize) -> Result<Self, MimeError> {
        if depth > max_depth {
            return Err(MimeError::TooDeep { depth: max_depth });
        }

        let (headers, offset) = mailparse::parse_headers(raw)?;
        let body = &raw[offset.min(raw.len())..];

        let ctype = mailparse::parse_content_type(
            &headers
                .get_first_value("Content-Type")
                .unwrap_or_else(|| String::from("text/plain; charset=us-ascii")),
        );
        let encoding = headers
            .get_first_value("Content-Transfer-Encoding")
            .map_or_else(TransferEncoding::default, |value| TransferEncoding::parse(&value));

        let payload = if ctype.mimetype.starts_with("multipart/") {
            match ctype.params.get("boundary") {
                Some(boundary) => Payload::Multipart {
                    boundary: boundary.clone(),
                    parts: split_parts(body, boundary)
                        .into_iter()
                        .map(|part| Self::parse_at(part, depth + 1, max_depth))
                        .collect::<Result<_, _>>()?,
                },
                None => {
                    tracing::warn!(
                        "{} without a boundary, passing it through untouched",
                        ctype.mimetype
                    );
                    Payload::Leaf(body)
                }
            }
        } else if ctype.mimetype == "message/rfc822" {
            Payload::Message(Box::new(Self::parse_at(body, depth + 1, max_depth)?))
        } else {
            Payload::Leaf(body)
        };

        Ok(Self {
            media_type: ctype.mimetype,
            params: ctype.params,
            encoding,
            headers: headers.iter().map(Header::from_parsed).collect(),
            payload,
        })
    }

    #[must_use]
    pub fn is_html(&self) -> bool {
        self.media_type == "text/html" && matches!(self.payload, Payload::Leaf(_))
    }
}

/// Split a multipart body on `--boundary` delimiter lines.
///
/// The preamble and epilogue are dropped, as is the line break in front of
/// each delimiter (it belongs to the delimiter). A body that is missing its
/// close delimiter keeps everything after the last delimiter as a part.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut line_start = 0;

    while line_start < body.len() {
        let line_end = body[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |ix| line_start + ix + 1);

        let line = trim_line(&body[line_start..line_end]);
        let closing = line.strip_prefix(delimiter.as_bytes()) == Some(b"--".as_slice());

        if closing || line == delimiter.as_bytes() {
            if let Some(start) = current {
                parts.push(&body[start..content_end(body, start, line_start)]);
            }

            if closing {
                return parts;
            }

            current = Some(line_end);
        }

        line_start = line_end;
    }

    if let Some(start) = current {
        parts.push(&body[start.min(body.len())..]);
    }

    parts
}

/// Strip the line terminator and any transport padding.
fn trim_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | b' ' | b'\t'))
        .map_or(0, |ix| ix + 1);
    &line[..end]
}

fn content_end(body: &[u8], start: usize, delimiter_start: usize) -> usize {
    let mut end = delimiter_start;
    if end > start && body[end - 1] == b'\n' {
        end -= 1;
        if end > start && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn transfer_encoding_names() {
        assert_eq!(TransferEncoding::parse(" Base64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("QUOTED-PRINTABLE"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(
            TransferEncoding::parse("x-uuencode"),
            TransferEncoding::Other("x-uuencode".to_string())
        );
    }

    #[test]
    fn split_on_boundary() {
        let body = b"preamble\r\n--xyz\r\n\r\none\r\n--xyz\r\nA: b\r\n\r\ntwo\r\n--xyz--\r\nepilogue\r\n";
        let parts = split_parts(body, "xyz");

        assert_eq!(parts, vec![b"\r\none".as_slice(), b"A: b\r\n\r\ntwo".as_slice()]);
    }

    #[test]
    fn split_without_close_delimiter() {
        let parts = split_parts(b"--b\r\n\r\nonly\r\n", "b");
        assert_eq!(parts, vec![b"\r\nonly\r\n".as_slice()]);
    }

    #[test]
    fn boundary_prefix_is_not_a_delimiter() {
        let parts = split_parts(b"--b\r\n\r\n--bb is text\r\n--b--\r\n", "b");
        assert_eq!(parts, vec![b"\r\n--bb is text".as_slice()]);
    }

    #[test]
    fn parse_tree() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"outer\"\r\n\r\n\
--outer\r\n\
Content-Type: text/plain\r\n\r\nhello\r\n\
--outer\r\n\
Content-Type: message/rfc822\r\n\r\n\
Subject: inner\r\nContent-Type: text/html\r\nContent-Transfer-Encoding: base64\r\n\r\nSGVsbG8=\r\n\
--outer--\r\n";

        let node = MimeNode::parse(raw, 8).unwrap();
        assert_eq!(node.media_type, "multipart/mixed");

        let Payload::Multipart { boundary, parts } = &node.payload else {
            panic!("expected multipart, got {:?}", node.payload);
        };
        assert_eq!(boundary, "outer");
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0].payload, Payload::Leaf(b"hello")));

        let Payload::Message(inner) = &parts[1].payload else {
            panic!("expected embedded message");
        };
        assert!(inner.is_html());
        assert_eq!(inner.encoding, TransferEncoding::Base64);
    }

    #[test]
    fn default_content_type_is_plain_text() {
        let node = MimeNode::parse(b"Subject: hi\r\n\r\nbody\r\n", 8).unwrap();
        assert_eq!(node.media_type, "text/plain");
        assert_eq!(node.encoding, TransferEncoding::Absent);
    }

    #[test]
    fn nesting_is_bounded() {
        let mut raw = b"Subject: leaf\r\n\r\nbody\r\n".to_vec();
        for _ in 0..5 {
            let mut wrapped = b"Content-Type: message/rfc822\r\n\r\n".to_vec();
            wrapped.extend_from_slice(&raw);
            raw = wrapped;
        }

        assert!(MimeNode::parse(&raw, 5).is_ok());
        assert!(matches!(
            MimeNode::parse(&raw, 4),
            Err(MimeError::TooDeep { depth: 4 })
        ));
    }

    #[test]
    fn headers_keep_order_and_raw_values() {
        let node = MimeNode::parse(b"X-B: 2\r\nSubject:  folded\r\n  value\r\nX-A: 1\r\n\r\n", 8).unwrap();
        let names: Vec<_> = node.headers.iter().map(|h| h.name.as_str()).collect();

        assert_eq!(names, ["X-B", "Subject", "X-A"]);
        assert!(node.headers[1].is("subject"));
        assert!(node.headers[1].value.starts_with(b"folded"));
        assert!(node.headers[1].value.ends_with(b"value"));
        assert_eq!(node.headers[2].value, b"1".to_vec());
    }

    #[test]
    fn multipart_without_boundary_is_a_leaf() {
        let node = MimeNode::parse(b"Content-Type: multipart/mixed\r\n\r\nstuff\r\n", 8).unwrap();
        assert!(matches!(node.payload, Payload::Leaf(b"stuff\r\n")));
    }
}
