//! Shared building blocks for the SSO workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
