//! Error types for protocol primitives

/// Errors from token exchange and token decoding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),

    #[error("malformed bearer token: {0}")]
    MalformedToken(String),
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
