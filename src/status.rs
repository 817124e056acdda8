use core::fmt::{self, Display, Formatter};

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    /// No structured reply was received (transport or local failure).
    Unset = 0,
    ServiceReady = 220,
    GoodBye = 221,
    Ok = 250,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    ActionUnavailable = 451,
    TlsUnavailable = 454,
    SyntaxError = 500,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    Error = 550,
    ExceededStorage = 552,
    Unknown(u16),
}

impl Status {
    /// Checks if the status is a positive completion or intermediate reply
    pub fn is_success(self) -> bool {
        (200..400).contains(&u16::from(self))
    }

    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u16::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u16::from(self))
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unset,
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            334 => Self::AuthContinue,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            454 => Self::TlsUnavailable,
            500 => Self::SyntaxError,
            502 => Self::NotImplemented,
            503 => Self::InvalidCommandSequence,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u16 {
    fn from(value: Status) -> Self {
        match value {
            Status::Unset => 0,
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::AuthContinue => 334,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::TlsUnavailable => 454,
            Status::SyntaxError => 500,
            Status::NotImplemented => 502,
            Status::InvalidCommandSequence => 503,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u16::from(*self))
    }
}

/// An RFC 3463 enhanced status code, `class.subject.detail`.
///
/// Only single-digit components are recognised, matching the `D.D.D `
/// prefix relays put in front of their reply text.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnhancedCode {
    pub class: u8,
    pub subject: u8,
    pub detail: u8,
}

impl EnhancedCode {
    #[must_use]
    pub const fn new(class: u8, subject: u8, detail: u8) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    /// Splits a leading `D.D.D ` off `message`.
    ///
    /// Returns `None` unless the first six bytes are exactly digit, dot,
    /// digit, dot, digit, space; the message is never partially consumed.
    #[must_use]
    pub fn split_prefix(message: &str) -> Option<(Self, &str)> {
        let bytes = message.as_bytes();
        if bytes.len() < 6 {
            return None;
        }

        let digit = |b: u8| b.is_ascii_digit().then(|| b - b'0');

        let class = digit(bytes[0])?;
        let subject = digit(bytes[2])?;
        let detail = digit(bytes[4])?;

        if bytes[1] != b'.' || bytes[3] != b'.' || bytes[5] != b' ' {
            return None;
        }

        Some((Self::new(class, subject, detail), &message[6..]))
    }
}

impl TryFrom<String> for EnhancedCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::split_prefix(&format!("{value} "))
            .filter(|(_, rest)| rest.is_empty())
            .map(|(code, _)| code)
            .ok_or_else(|| format!("{value:?} is not an enhanced status code"))
    }
}

impl From<EnhancedCode> for String {
    fn from(value: EnhancedCode) -> Self {
        value.to_string()
    }
}

impl Display for EnhancedCode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// A single SMTP reply as seen by the bridge: the numeric code, the
/// enhanced code (if one was present or could be derived) and the text.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Reply {
    pub code: u16,
    pub enhanced: Option<EnhancedCode>,
    pub message: String,
}

impl Reply {
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn of(status: Status, message: impl Into<String>) -> Self {
        Self::new(status.into(), message)
    }

    #[must_use]
    pub fn with_enhanced(mut self, enhanced: EnhancedCode) -> Self {
        self.enhanced = Some(enhanced);
        self
    }

    /// The reply used when nothing structured came back from the relay.
    #[must_use]
    pub fn unset(message: impl Into<String>) -> Self {
        Self::of(Status::Unset, message)
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status::from(self.code)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self.enhanced {
            Some(enhanced) => write!(fmt, "{} {enhanced} {}", self.code, self.message),
            None => write!(fmt, "{} {}", self.code, self.message),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{EnhancedCode, Reply, Status};

    #[test]
    fn status() {
        assert!(Status::Error.is_permanent());
        assert!(!Status::Error.is_temporary());

        assert!(Status::Unavailable.is_temporary());
        assert!(!Status::Unavailable.is_permanent());

        assert!(Status::StartMailInput.is_success());
        assert!(!Status::Unset.is_success());

        assert_eq!(Status::from(550), Status::Error);
        assert_eq!(u16::from(Status::Error), 550);
        assert_eq!(Status::from(299), Status::Unknown(299));
    }

    #[test]
    fn enhanced_prefix() {
        let (code, rest) = EnhancedCode::split_prefix("2.1.5 OK").unwrap();
        assert_eq!(code, EnhancedCode::new(2, 1, 5));
        assert_eq!(rest, "OK");

        assert!(EnhancedCode::split_prefix("2.1.5OK").is_none());
        assert!(EnhancedCode::split_prefix("2,1.5 OK").is_none());
        assert!(EnhancedCode::split_prefix("2.x.5 OK").is_none());
        assert!(EnhancedCode::split_prefix("25.1.5 OK").is_none());
        assert!(EnhancedCode::split_prefix("2.1.").is_none());
    }

    #[test]
    fn enhanced_from_string() {
        assert_eq!(
            EnhancedCode::try_from("5.0.0".to_string()),
            Ok(EnhancedCode::new(5, 0, 0))
        );
        assert!(EnhancedCode::try_from("5.0".to_string()).is_err());
        assert!(EnhancedCode::try_from("5.0.0 extra".to_string()).is_err());
        assert_eq!(String::from(EnhancedCode::new(4, 7, 1)), "4.7.1");
    }

    #[test]
    fn reply_display() {
        let reply = Reply::of(Status::Ok, "queued").with_enhanced(EnhancedCode::new(2, 0, 0));
        assert_eq!(reply.to_string(), "250 2.0.0 queued");
        assert_eq!(Reply::new(354, "Go ahead").to_string(), "354 Go ahead");
    }
}
