//! Reply parsing for the upstream leg.

use crate::{
    error::{UpstreamError, UpstreamResult},
    status::{EnhancedCode, Reply},
    translate,
};

/// A complete, possibly multi-line, reply from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it used, or `None` if the
    /// buffer does not yet hold a final line.
    ///
    /// # Errors
    ///
    /// Fails if a line is not `code[ -]text` or the code changes between
    /// the lines of one reply.
    pub fn parse(buffer: &[u8]) -> UpstreamResult<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = std::str::from_utf8(raw)?;
            let (line_code, last, text) = Self::parse_line(line)?;

            match code {
                Some(code) if code != line_code => {
                    return Err(UpstreamError::Parse(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {line_code}"
                    )));
                }
                Some(_) => {}
                None => code = Some(line_code),
            }

            lines.push(text.to_string());

            if last {
                return Ok(Some((Self::new(line_code, lines), consumed)));
            }
        }

        Ok(None)
    }

    fn parse_line(line: &str) -> UpstreamResult<(u16, bool, &str)> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| UpstreamError::Parse(format!("Invalid status code: '{line}'")))?;

        match line.as_bytes().get(3) {
            None => Ok((code, true, "")),
            Some(b' ') => Ok((code, true, &line[4..])),
            Some(b'-') => Ok((code, false, &line[4..])),
            Some(c) => Err(UpstreamError::Parse(format!(
                "Invalid separator character: '{}'",
                char::from(*c)
            ))),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// Convert into the bridge's [`Reply`]. The enhanced code is taken from
    /// the first line and stripped from every line that repeats it. Lines
    /// are joined with `\n`.
    #[must_use]
    pub fn into_reply(self) -> Reply {
        let mut lines = self.lines.into_iter();
        let first = lines.next().unwrap_or_default();
        let mut reply = translate::reported(self.code, &first);

        for line in lines {
            let text = match (reply.enhanced, EnhancedCode::split_prefix(&line)) {
                (Some(first), Some((code, rest))) if code == first => rest,
                _ => line.as_str(),
            };
            reply.message.push('\n');
            reply.message.push_str(text);
        }

        reply
    }
}
