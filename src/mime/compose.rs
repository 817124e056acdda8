//! Builds complete messages: headers, a text and/or HTML body, and base64
//! attachments.

use std::io::{self, Write};

use base64::{engine::general_purpose::STANDARD, write::EncoderWriter};

use crate::linesplit::LineSplitter;

/// An attachment with filename, content type, and data.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Builder for messages with MIME formatting.
///
/// ```
/// use empath_proxy::mime::compose::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build()
///     .unwrap();
///
/// assert!(message.starts_with("From: sender@example.com\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    boundary: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    #[must_use]
    pub fn cc(mut self, email: impl Into<String>) -> Self {
        self.cc.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header. Custom headers are written in the order added.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.text = Some(content.into());
        self
    }

    /// Sets an HTML body, sent quoted-printable.
    #[must_use]
    pub fn html(mut self, content: impl Into<String>) -> Self {
        self.html = Some(content.into());
        self
    }

    #[must_use]
    pub fn attach(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Fixes the multipart boundary instead of generating one.
    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Builds the final message.
    ///
    /// A single body with no attachments is sent as a simple message;
    /// anything more becomes `multipart/mixed`, or `multipart/alternative`
    /// when only a text and an HTML body are present.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding an attachment fails.
    pub fn build(self) -> io::Result<String> {
        let mut message = Vec::with_capacity(2048);
        self.write_envelope_headers(&mut message)?;
        write!(&mut message, "MIME-Version: 1.0\r\n")?;

        let mut sections: Vec<Vec<u8>> = Vec::new();
        if let Some(text) = &self.text {
            sections.push(text_section(text)?);
        }
        if let Some(html) = &self.html {
            sections.push(html_section(html)?);
        }
        for attachment in &self.attachments {
            sections.push(attachment_section(attachment)?);
        }

        match sections.len() {
            0 => {
                message.extend_from_slice(&text_section("")?);
            }
            1 => {
                message.extend_from_slice(&sections[0]);
            }
            _ => {
                let subtype = if self.attachments.is_empty() {
                    "alternative"
                } else {
                    "mixed"
                };
                let boundary = self.boundary.clone().unwrap_or_else(generate_boundary);

                write!(
                    &mut message,
                    "Content-Type: multipart/{subtype}; boundary=\"{boundary}\"\r\n\r\n"
                )?;
                for section in &sections {
                    write!(&mut message, "--{boundary}\r\n")?;
                    message.extend_from_slice(section);
                    write!(&mut message, "\r\n")?;
                }
                write!(&mut message, "--{boundary}--\r\n")?;
            }
        }

        String::from_utf8(message).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn write_envelope_headers(&self, message: &mut Vec<u8>) -> io::Result<()> {
        if let Some(from) = &self.from {
            write!(message, "From: {from}\r\n")?;
        }
        if !self.to.is_empty() {
            write!(message, "To: {}\r\n", self.to.join(", "))?;
        }
        if !self.cc.is_empty() {
            write!(message, "Cc: {}\r\n", self.cc.join(", "))?;
        }
        if let Some(subject) = &self.subject {
            write!(message, "Subject: {subject}\r\n")?;
        }
        for (name, value) in &self.headers {
            write!(message, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

fn text_section(text: &str) -> io::Result<Vec<u8>> {
    let mut section = Vec::with_capacity(text.len() + 64);
    write!(&mut section, "Content-Type: text/plain; charset=utf-8\r\n\r\n{text}")?;
    Ok(section)
}

fn html_section(html: &str) -> io::Result<Vec<u8>> {
    let mut section = Vec::with_capacity(html.len() + 128);
    write!(
        &mut section,
        "Content-Type: text/html; charset=utf-8\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\n"
    )?;
    section.extend_from_slice(&quoted_printable::encode(html.as_bytes()));
    Ok(section)
}

fn attachment_section(attachment: &Attachment) -> io::Result<Vec<u8>> {
    let mut section = Vec::with_capacity(attachment.data.len() * 4 / 3 + 256);
    write!(
        &mut section,
        "Content-Type: {}\r\nContent-Transfer-Encoding: base64\r\nContent-Disposition: attachment; filename=\"{}\"\r\n\r\n",
        attachment.content_type, attachment.filename
    )?;

    let mut encoder = EncoderWriter::new(LineSplitter::mime(section), &STANDARD);
    encoder.write_all(&attachment.data)?;
    Ok(encoder.finish()?.into_inner())
}

fn generate_boundary() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    format!("----=_Part_{timestamp}")
}
