//! Flow error taxonomy
//!
//! Every variant is terminal for the attempt: nothing is retried
//! automatically, the caller starts a fresh flow with a new state/verifier
//! pair. The internal variants stay distinct for logging; the user-facing
//! string deliberately does not reveal which check failed, so a forged
//! callback gets no feedback about how close it came.

use thiserror::Error;

/// Errors from a sign-on attempt.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Missing or mismatched state, or missing verifier.
    #[error("callback correlation failed: {0}")]
    Correlation(String),

    /// The transport or identity provider rejected the code exchange.
    #[error("token exchange failed: {0}")]
    Exchange(String),

    /// The bearer token's identity claim could not be decoded.
    #[error("malformed bearer token: {0}")]
    MalformedToken(String),

    /// The popup attempt expired before a callback message arrived.
    #[error("timed out waiting for the sign-on callback")]
    Timeout,

    /// The persisted challenge slots could not be read or written.
    #[error("challenge storage failed: {0}")]
    Storage(String),
}

/// Result alias for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    /// Single generic banner text. Correlation, exchange, and token failures
    /// all collapse into the same message on purpose.
    pub fn user_message(&self) -> &'static str {
        match self {
            FlowError::Timeout => "Sign-in timed out. Please try again.",
            _ => "Unable to sign in. Please try again.",
        }
    }
}

impl From<sso_auth::Error> for FlowError {
    fn from(err: sso_auth::Error) -> Self {
        match err {
            sso_auth::Error::Http(msg) | sso_auth::Error::Exchange(msg) => {
                FlowError::Exchange(msg)
            }
            sso_auth::Error::MalformedToken(msg) => FlowError::MalformedToken(msg),
        }
    }
}
