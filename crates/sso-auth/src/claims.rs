//! Bearer-token identity extraction
//!
//! The token endpoint returns a compact three-segment signed token. This
//! layer does not verify the signature (the token came over TLS from the
//! trusted endpoint and is discarded right after); it only reads the
//! `custom.email` claim out of the payload segment to learn who signed in.
//! Every decode failure maps to `MalformedToken` so a garbage token can
//! never panic the caller.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{Error, Result};

/// Claim path holding the authenticated username.
const IDENTITY_CLAIM: &str = "custom.email";

/// Decode the identity claim from a compact token.
///
/// Splits on `.`, requires exactly three segments, base64url-decodes the
/// payload, parses it as JSON, and reads `custom.email` as a string.
pub fn decode_identity(access_token: &str) -> Result<String> {
    let segments: Vec<&str> = access_token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::MalformedToken(format!(
            "expected 3 segments, got {}",
            segments.len()
        )));
    }

    // Tolerate padded producers; the alphabet itself must be URL-safe.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::MalformedToken(format!("payload is not base64url: {e}")))?;

    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("payload is not JSON: {e}")))?;

    claims
        .get("custom")
        .and_then(|custom| custom.get("email"))
        .and_then(|email| email.as_str())
        .map(str::to_owned)
        .ok_or_else(|| Error::MalformedToken(format!("missing {IDENTITY_CLAIM} claim")))
}
