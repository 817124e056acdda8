//! Turns what the upstream leg reports into the `(code, enhanced, message)`
//! reply that is handed back to the client.

use crate::{
    error::{ProxyError, Rejection, UpstreamError},
    status::{EnhancedCode, Reply},
};

/// Normalise `err` into a client-facing reply.
///
/// A structured rejection from the relay passes through unchanged. Any
/// other failure has no reply code behind it and becomes code 0 with no
/// enhanced code and the error text verbatim.
#[must_use]
pub fn translate(err: &UpstreamError) -> Reply {
    match err {
        UpstreamError::Rejected(reply) => reply.clone(),
        other => Reply::unset(other.to_string()),
    }
}

/// Build the reply for text the relay sent under the numeric `code`.
///
/// An exact `D.D.D ` prefix is parsed into the enhanced code and stripped.
/// Anything that only nearly matches is left in the message untouched.
#[must_use]
pub fn reported(code: u16, text: &str) -> Reply {
    match EnhancedCode::split_prefix(text) {
        Some((enhanced, rest)) => Reply::new(code, rest).with_enhanced(enhanced),
        None => Reply::new(code, text),
    }
}

/// Wrap an upstream failure as a [`Rejection`] for the protocol engine.
#[must_use]
pub fn reject(err: UpstreamError) -> Rejection {
    Rejection::new(translate(&err), ProxyError::Upstream(err))
}
