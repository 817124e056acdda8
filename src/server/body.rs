//! The dot-terminated DATA body sent by the client.

/// A DATA body, once the terminating `.` line has been seen.
#[derive(Debug, PartialEq, Eq)]
pub enum Body {
    Complete(Vec<u8>),
    /// The body went over the limit; it was read to the end and discarded.
    TooLarge { size: usize },
}

/// Accumulates a body chunk by chunk, undoing dot-stuffing.
///
/// A chunk is everything up to and including a `\n`, or a piece of a line
/// too long to read in one go.
#[derive(Debug)]
pub struct BodyBuilder {
    body: Vec<u8>,
    limit: usize,
    size: usize,
    at_line_start: bool,
}

impl BodyBuilder {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            body: Vec::new(),
            limit,
            size: 0,
            at_line_start: true,
        }
    }

    /// Add a chunk. Returns `true` once the terminator has been read.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        let line_start = self.at_line_start;
        self.at_line_start = chunk.ends_with(b"\n");

        if line_start && matches!(chunk, b".\r\n" | b".\n") {
            return true;
        }

        let chunk = match chunk {
            [b'.', rest @ ..] if line_start => rest,
            _ => chunk,
        };

        self.size += chunk.len();
        if self.size <= self.limit {
            self.body.extend_from_slice(chunk);
        } else if !self.body.is_empty() {
            self.body = Vec::new();
        }

        false
    }

    #[must_use]
    pub fn finish(self) -> Body {
        if self.size > self.limit {
            Body::TooLarge { size: self.size }
        } else {
            Body::Complete(self.body)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Body, BodyBuilder};

    fn collect(chunks: &[&[u8]], limit: usize) -> (Body, usize) {
        let mut builder = BodyBuilder::new(limit);

        for (index, chunk) in chunks.iter().enumerate() {
            if builder.push(chunk) {
                return (builder.finish(), index);
            }
        }

        panic!("no terminator in {chunks:?}");
    }

    #[test]
    fn test_terminator_and_unstuffing() {
        let (body, at) = collect(
            &[b"Subject: x\r\n", b"\r\n", b"..leading dot\r\n", b"mid.dle\r\n", b".\r\n", b"after\r\n"],
            1024,
        );

        assert_eq!(at, 4);
        assert_eq!(
            body,
            Body::Complete(b"Subject: x\r\n\r\n.leading dot\r\nmid.dle\r\n".to_vec())
        );
    }

    #[test]
    fn test_bare_lf_terminator() {
        let (body, _) = collect(&[b"line\n", b".\n"], 1024);
        assert_eq!(body, Body::Complete(b"line\n".to_vec()));
    }

    #[test]
    fn test_split_line_is_not_a_terminator() {
        let (body, at) = collect(&[b"long ", b".\r\n", b".\r\n"], 1024);

        assert_eq!(at, 2);
        assert_eq!(body, Body::Complete(b"long .\r\n".to_vec()));
    }

    #[test]
    fn test_too_large() {
        let (body, _) = collect(&[b"0123456789\r\n", b"0123456789\r\n", b".\r\n"], 16);
        assert_eq!(body, Body::TooLarge { size: 24 });
    }
}
