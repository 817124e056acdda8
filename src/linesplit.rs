//! A writer that breaks a byte stream into fixed-length lines.
//!
//! RFC 2045 section 6.8 limits encoded lines to 76 characters; wrapping
//! the output of a base64 encoder in a [`LineSplitter`] enforces that no
//! matter how the encoder chunks its writes.

use std::{io, num::NonZeroUsize};

/// Maximum encoded line length for MIME transfer encodings.
pub const MIME_LINE_LENGTH: NonZeroUsize = match NonZeroUsize::new(76) {
    Some(len) => len,
    None => unreachable!(),
};

/// Groups everything written into runs of `len` bytes, each followed by
/// `separator`.
///
/// The position inside the current run is carried across calls, so the
/// output does not depend on how the input was split into writes. An
/// incomplete final run is left without a separator.
#[derive(Debug)]
pub struct LineSplitter<W> {
    len: usize,
    count: usize,
    separator: Vec<u8>,
    inner: W,
}

impl<W: io::Write> LineSplitter<W> {
    pub fn new(len: NonZeroUsize, separator: impl Into<Vec<u8>>, inner: W) -> Self {
        Self {
            len: len.get(),
            count: 0,
            separator: separator.into(),
            inner,
        }
    }

    /// A splitter for MIME bodies: 76 bytes per line, CRLF terminated.
    pub fn mime(inner: W) -> Self {
        Self::new(MIME_LINE_LENGTH, "\r\n", inner)
    }

    /// Unwrap the splitter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> io::Write for LineSplitter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;

        while !rest.is_empty() {
            let take = rest.len().min(self.len - self.count);
            let (chunk, tail) = rest.split_at(take);

            self.inner.write_all(chunk)?;
            self.count += take;
            rest = tail;

            if self.count == self.len {
                self.inner.write_all(&self.separator)?;
                self.count = 0;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
