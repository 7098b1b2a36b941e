//! Flow configuration
//!
//! Endpoint URLs and flow knobs, loadable from TOML with env-var overlay
//! (`SSO_AUTHORIZE_URL`, `SSO_TOKEN_URL` take precedence over the file).
//! The overlay takes an injected lookup so tests never mutate process
//! environment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Sign-on flow settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Identity provider authorization endpoint (redirect/popup target).
    pub authorize_url: String,
    /// Token endpoint the auth code is exchanged against.
    pub token_url: String,
    /// How long a popup attempt may wait for its callback message.
    #[serde(default = "default_popup_timeout_secs")]
    pub popup_timeout_secs: u64,
    /// Whether the PKCE verifier/challenge pair is generated and required.
    /// Disabled only for legacy providers without PKCE support; the CSRF
    /// state check applies either way.
    #[serde(default = "default_uses_pkce")]
    pub uses_pkce: bool,
}

fn default_popup_timeout_secs() -> u64 {
    180
}

fn default_uses_pkce() -> bool {
    true
}

impl FlowConfig {
    pub fn new(authorize_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            popup_timeout_secs: default_popup_timeout_secs(),
            uses_pkce: default_uses_pkce(),
        }
    }

    /// Load from a TOML file, overlay process env vars, validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: FlowConfig = toml::from_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay endpoint URLs from an environment lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SSO_AUTHORIZE_URL") {
            self.authorize_url = url;
        }
        if let Some(url) = lookup("SSO_TOKEN_URL") {
            self.token_url = url;
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        for (name, url) in [
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }
        if self.popup_timeout_secs == 0 {
            return Err(common::Error::Config(
                "popup_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn popup_timeout(&self) -> Duration {
        Duration::from_secs(self.popup_timeout_secs)
    }
}
