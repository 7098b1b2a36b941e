//! Shared error types

use thiserror::Error;

/// Errors from loading and validating configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using the shared Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_detail() {
        let err = Error::Config("authorize_url must be absolute".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: authorize_url must be absolute"
        );
    }

    #[test]
    fn io_and_toml_errors_convert() {
        let io: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(io.to_string().starts_with("I/O error:"));

        let bad: std::result::Result<toml::Value, _> = toml::from_str("= not toml =");
        let toml_err: Error = bad.unwrap_err().into();
        assert!(toml_err.to_string().starts_with("TOML parse error:"));
    }
}
