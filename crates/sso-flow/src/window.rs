//! Browsing-context capability
//!
//! `WindowChannel` abstracts the pieces of the host window environment the
//! flow needs: navigating the current context (redirect variant), opening a
//! secondary context (popup variant), and the cross-context message channel
//! the popup uses to deliver the provider's callback. The controller
//! acquires the message subscription for the lifetime of one popup attempt
//! and releases it on completion, failure, timeout, or cancellation —
//! `close()` releases only the subscription, it never force-closes the
//! popup window itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::Poll;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::Result;

/// Payload a popup posts back to its opener. Both fields are optional
/// because the message is attacker-reachable input; validation happens in
/// the flow controller, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackMessage {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub auth_code: Option<String>,
}

/// Host browsing-context capability.
pub trait WindowChannel: Send + Sync {
    /// Navigate the current context to `url` (full-page redirect).
    fn navigate(&self, url: &str) -> Result<()>;

    /// Open a secondary context at `url` and register a fresh message
    /// subscription, replacing any subscription from an earlier attempt.
    fn open(&self, url: &str) -> Result<()>;

    /// Post a callback message from the secondary context to the opener.
    fn post(&self, message: CallbackMessage);

    /// Wait for the next message on the current subscription. Resolves to
    /// `None` once the subscription is gone.
    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<CallbackMessage>> + Send + '_>>;

    /// Release the message subscription. Idempotent.
    fn close(&self);
}

/// Reference `WindowChannel` backed by a tokio channel, for hosts that run
/// both browsing contexts in one process and for tests.
///
/// Each `open()` replaces the subscription, so a listener leaked by an
/// abandoned attempt can never observe a later attempt's callback. Messages
/// posted while no subscription exists are dropped.
#[derive(Default)]
pub struct InProcessChannel {
    sender: Mutex<Option<UnboundedSender<CallbackMessage>>>,
    receiver: Mutex<Option<UnboundedReceiver<CallbackMessage>>>,
    navigations: Mutex<Vec<String>>,
    popups: Mutex<Vec<String>>,
}

impl InProcessChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL of the most recent full-page navigation.
    pub fn last_navigation(&self) -> Option<String> {
        lock(&self.navigations).last().cloned()
    }

    /// URL of the most recently opened popup.
    pub fn last_popup(&self) -> Option<String> {
        lock(&self.popups).last().cloned()
    }

    /// Whether a message subscription is currently registered.
    pub fn has_listener(&self) -> bool {
        lock(&self.receiver).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WindowChannel for InProcessChannel {
    fn navigate(&self, url: &str) -> Result<()> {
        debug!(url, "navigating current context");
        lock(&self.navigations).push(url.to_owned());
        Ok(())
    }

    fn open(&self, url: &str) -> Result<()> {
        debug!(url, "opening popup context");
        lock(&self.popups).push(url.to_owned());
        let (tx, rx) = mpsc::unbounded_channel();
        // Dropping the previous receiver here is what unregisters a stale
        // listener from an earlier attempt.
        *lock(&self.sender) = Some(tx);
        *lock(&self.receiver) = Some(rx);
        Ok(())
    }

    fn post(&self, message: CallbackMessage) {
        if let Some(tx) = lock(&self.sender).as_ref() {
            // A send error means the subscription was already released;
            // late messages go nowhere.
            let _ = tx.send(message);
        }
    }

    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<CallbackMessage>> + Send + '_>> {
        Box::pin(std::future::poll_fn(move |cx| {
            match lock(&self.receiver).as_mut() {
                Some(rx) => rx.poll_recv(cx),
                None => Poll::Ready(None),
            }
        }))
    }

    fn close(&self) {
        if lock(&self.receiver).take().is_some() {
            debug!("released popup message subscription");
        }
    }
}
