//! SSO protocol primitives
//!
//! Building blocks for the authorization-code-with-PKCE sign-on flow:
//! random state/verifier generation, S256 challenge derivation,
//! authorization URL construction, bearer-token identity extraction, and
//! the token-exchange transport. This crate holds no per-attempt state —
//! the flow orchestration lives in `sso-flow`.
//!
//! Protocol steps covered here:
//! 1. `pkce::random_token()` produces the `state` nonce and `code_verifier`
//! 2. `pkce::compute_challenge()` derives the `code_challenge`
//! 3. `pkce::build_authorize_url()` builds the outbound IDP URL
//! 4. `TokenExchanger::exchange()` trades `(auth_code, code_verifier)` for a
//!    bearer token
//! 5. `claims::decode_identity()` reads the identity claim out of the token

pub mod claims;
pub mod error;
pub mod pkce;
pub mod token;

pub use claims::decode_identity;
pub use error::{Error, Result};
pub use pkce::{
    HashFunction, SecureRandomSource, Sha256Digest, SystemRandom, build_authorize_url,
    compute_challenge, random_token,
};
pub use token::{BearerToken, HttpTokenExchanger, TokenExchanger};
