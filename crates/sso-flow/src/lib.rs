//! Browser-style SSO sign-on flow
//!
//! Implements the authorization-code-with-PKCE sign-on sequence for an
//! embedding host: per-attempt state/verifier storage, redirect and popup
//! flow orchestration, callback correlation (the CSRF check), token
//! exchange, and identity hand-off. Host environment concerns — storage,
//! the window/message channel, the token transport, the identity sink —
//! are injected capability traits, so the protocol logic runs and tests
//! the same everywhere.
//!
//! Attempt lifecycle:
//! 1. `FlowController::start_redirect_flow()` or `start_popup_flow()`
//!    stores a fresh `(state, code_verifier)` via `ChallengeStore` and
//!    sends the browser to the identity provider
//! 2. The provider redirects back (query parameters) or the popup posts a
//!    message (`CallbackMessage`)
//! 3. `handle_callback()` correlates the response against the stored
//!    attempt, exchanges the code, clears the slots, and reports the
//!    identity through `IdentitySink`

pub mod account;
pub mod config;
pub mod error;
pub mod flow;
pub mod store;
pub mod window;

pub use account::{CurrentUser, IdentitySink};
pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use flow::{FlowController, FlowState};
pub use store::{
    ChallengeStore, FileStore, KeyValueStore, MemoryStore, STATE_SLOT, VERIFIER_SLOT,
};
pub use window::{CallbackMessage, InProcessChannel, WindowChannel};
