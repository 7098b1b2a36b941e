//! Redacting wrapper for sensitive values
//!
//! The PKCE code verifier and bearer tokens must never appear in logs or
//! debug output. `Secret` hides the value from Debug/Display and zeroizes
//! the memory when dropped; callers reach the inner value only through an
//! explicit `expose()` call that is easy to audit.

use std::fmt;
use zeroize::Zeroize;

/// A sensitive value, redacted everywhere except `expose()`.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Access the wrapped value. Call sites should be few and deliberate.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let verifier = Secret::new(String::from("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"));
        assert_eq!(format!("{verifier:?}"), "Secret([REDACTED])");
        assert_eq!(format!("{verifier}"), "[REDACTED]");
    }

    #[test]
    fn expose_returns_inner_value() {
        let secret: Secret<String> = String::from("verifier-bytes").into();
        assert_eq!(secret.expose(), "verifier-bytes");
    }

    #[test]
    fn clone_preserves_value() {
        let secret = Secret::new(String::from("v"));
        let copy = secret.clone();
        assert_eq!(copy.expose(), "v");
    }
}
