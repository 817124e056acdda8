use core::fmt::{self, Display, Formatter};

use crate::session::HelloKind;

/// A client command, split into its verb and argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(HelloKind, String),
    StartTls,
    Auth(String),
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Quit,
    /// Anything else is relayed verbatim.
    Other { verb: String, arg: String },
}

impl Command {
    /// The command's argument, or an empty string.
    #[must_use]
    pub fn arg(&self) -> &str {
        match self {
            Self::Helo(_, arg)
            | Self::Auth(arg)
            | Self::Mail(arg)
            | Self::Rcpt(arg)
            | Self::Other { arg, .. } => arg,
            Self::StartTls | Self::Data | Self::Rset | Self::Quit => "",
        }
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Helo(kind, _) => return write!(fmt, "{kind} {}", self.arg()),
            Self::StartTls => "STARTTLS",
            Self::Auth(_) => "AUTH",
            Self::Mail(_) => "MAIL",
            Self::Rcpt(_) => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Quit => "QUIT",
            Self::Other { verb, .. } => verb,
        };

        if self.arg().is_empty() {
            fmt.write_str(verb)
        } else {
            write!(fmt, "{verb} {}", self.arg())
        }
    }
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim().to_string();

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" => Self::Helo(HelloKind::Ehlo, arg),
            "HELO" => Self::Helo(HelloKind::Helo, arg),
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(arg),
            "MAIL" => Self::Mail(arg),
            "RCPT" => Self::Rcpt(arg),
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "QUIT" => Self::Quit,
            _ => Self::Other {
                verb: verb.to_string(),
                arg,
            },
        }
    }
}
