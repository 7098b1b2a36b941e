//! Identity hand-off
//!
//! The only state this flow carries forward after a login is the
//! authenticated username. `IdentitySink` is the downstream collaborator
//! that receives it; `CurrentUser` is a minimal in-process implementation
//! for hosts that just need "who is signed in".

use std::sync::Mutex;

use tracing::info;

/// Receives the authenticated username, exactly once per successful attempt.
pub trait IdentitySink: Send + Sync {
    fn report_identity(&self, username: &str);
}

/// Holds the current signed-in user for the lifetime of the process.
#[derive(Default)]
pub struct CurrentUser {
    username: Mutex<Option<String>>,
}

impl CurrentUser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.username
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }
}

impl IdentitySink for CurrentUser {
    fn report_identity(&self, username: &str) {
        info!(username, "user signed in");
        *self
            .username
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(username.to_owned());
    }
}
