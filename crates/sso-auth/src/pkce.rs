//! PKCE (Proof Key for Code Exchange) primitives per RFC 7636
//!
//! Generates the `state` nonce and `code_verifier`, derives the S256
//! `code_challenge`, and builds the authorization URL. The challenge is sent
//! to the identity provider in the authorization URL; the verifier is held
//! back and revealed only during token exchange, proving the exchange comes
//! from the party that started the flow.
//!
//! Randomness and hashing are injected through capability traits so the
//! flow layer can be exercised with scripted values; production code uses
//! the `rand` thread RNG (a CSPRNG) and `sha2`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Source of cryptographically secure random bytes.
///
/// Both the CSRF `state` and the PKCE verifier must be unguessable, so
/// implementations must be backed by a CSPRNG — a general-purpose PRNG here
/// would undermine the whole protocol.
pub trait SecureRandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Production randomness via the `rand` thread RNG.
pub struct SystemRandom;

impl SecureRandomSource for SystemRandom {
    fn fill(&self, buf: &mut [u8]) {
        rand::rng().fill(buf);
    }
}

/// One-way digest used to derive the code challenge.
pub trait HashFunction: Send + Sync {
    fn digest(&self, input: &[u8]) -> Vec<u8>;
}

/// SHA-256, the S256 challenge method.
pub struct Sha256Digest;

impl HashFunction for Sha256Digest {
    fn digest(&self, input: &[u8]) -> Vec<u8> {
        Sha256::digest(input).to_vec()
    }
}

/// Generate a random URL-safe token for use as `state` or `code_verifier`.
///
/// 32 random bytes (256 bits) encoded as unpadded URL-safe base64, giving a
/// 43-character string — the RFC 7636 minimum verifier length.
pub fn random_token(random: &dyn SecureRandomSource) -> String {
    let mut bytes = [0u8; 32];
    random.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the S256 code challenge from a verifier.
///
/// `challenge = base64url(SHA256(verifier))` with padding stripped and
/// `+`/`/` remapped to `-`/`_`. The identity provider recomputes this from
/// the verifier revealed at exchange time and compares.
pub fn compute_challenge(hasher: &dyn HashFunction, verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(hasher.digest(verifier.as_bytes()))
}

/// Build the outbound authorization URL.
///
/// `state` is mandatory; `challenge` is present for PKCE flows and omitted
/// for the legacy non-PKCE variant. Both values are unpadded base64url, so
/// no percent-encoding is needed. An endpoint that already carries query
/// parameters (e.g. a tenant selector) gets the flow parameters appended
/// with `&` instead of a second `?`.
pub fn build_authorize_url(authorize_url: &str, state: &str, challenge: Option<&str>) -> String {
    let sep = if authorize_url.contains('?') { '&' } else { '?' };
    match challenge {
        Some(challenge) => {
            format!("{authorize_url}{sep}state={state}&challenge_code={challenge}")
        }
        None => format!("{authorize_url}{sep}state={state}"),
    }
}
