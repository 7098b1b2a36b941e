//! Token exchange transport
//!
//! Trades the single-use `auth_code` for a bearer token by POSTing
//! `{ auth_code, code_verifier }` as JSON to the token endpoint. The
//! endpoint is expected to reject a reused or foreign `auth_code`; that
//! rejection surfaces here as a non-success status and becomes an
//! `Exchange` error. The flow layer treats every non-success uniformly.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Successful token endpoint response.
///
/// `access_token` is a compact three-segment signed token. It is opaque to
/// this layer apart from the identity claim read by `claims`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BearerToken {
    pub access_token: String,
}

/// JSON body sent to the token endpoint.
///
/// `code_verifier` is omitted entirely (not sent as null) for the
/// non-PKCE variant.
#[derive(Serialize)]
struct ExchangeRequest<'a> {
    auth_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
}

/// Abstraction over the token-exchange call.
///
/// The flow controller depends on this trait rather than on an HTTP client,
/// so tests can count calls and script responses. Uses `Pin<Box<dyn Future>>`
/// return types for dyn-compatibility (`Arc<dyn TokenExchanger>`).
pub trait TokenExchanger: Send + Sync {
    /// Exchange an authorization code (plus verifier, when PKCE is in use)
    /// for a bearer token.
    fn exchange<'a>(
        &'a self,
        auth_code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<BearerToken>> + Send + 'a>>;
}

/// Production transport over `reqwest`.
pub struct HttpTokenExchanger {
    client: reqwest::Client,
    token_url: String,
}

impl HttpTokenExchanger {
    pub fn new(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }
}

impl TokenExchanger for HttpTokenExchanger {
    fn exchange<'a>(
        &'a self,
        auth_code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<BearerToken>> + Send + 'a>> {
        Box::pin(async move {
            debug!(token_url = %self.token_url, "exchanging authorization code");

            let response = self
                .client
                .post(&self.token_url)
                .json(&ExchangeRequest {
                    auth_code,
                    code_verifier,
                })
                .send()
                .await
                .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                return Err(Error::Exchange(format!(
                    "token endpoint returned {status}: {body}"
                )));
            }

            response
                .json::<BearerToken>()
                .await
                .map_err(|e| Error::Exchange(format!("invalid token response: {e}")))
        })
    }
}
