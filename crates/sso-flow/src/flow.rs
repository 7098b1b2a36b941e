//! Sign-on flow orchestration
//!
//! One controller drives both flow variants:
//!
//! - **Redirect**: `start_redirect_flow()` stores a fresh state/verifier and
//!   navigates the current context to the identity provider. The provider
//!   eventually redirects back with `state` and `auth_code` query
//!   parameters, which a fresh page load feeds into `complete_redirect()`.
//! - **Popup**: `start_popup_flow()` opens a secondary context and awaits a
//!   single cross-context callback message under a timeout.
//!
//! Both variants funnel into `handle_callback()`, the one place where the
//! callback is correlated against the stored attempt and, only then,
//! exchanged for a token. Keeping a single validation path is what prevents
//! the variants from drifting apart on security behavior.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use common::Secret;
use sso_auth::{TokenExchanger, claims, pkce};

use crate::account::IdentitySink;
use crate::config::FlowConfig;
use crate::error::{FlowError, Result};
use crate::store::ChallengeStore;
use crate::window::WindowChannel;

/// Attempt lifecycle. `Failed` and `Succeeded` are terminal; a new
/// `start_*` call begins a fresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingCallback,
    Validated,
    Exchanging,
    Succeeded,
    Failed,
}

/// Orchestrates one sign-on attempt at a time.
///
/// Starting a new attempt while another is pending silently invalidates the
/// pending one (the challenge slots are overwritten); only the most recent
/// attempt is ever trusted.
pub struct FlowController {
    config: FlowConfig,
    challenges: ChallengeStore,
    window: Arc<dyn WindowChannel>,
    exchanger: Arc<dyn TokenExchanger>,
    identity_sink: Arc<dyn IdentitySink>,
    state: Mutex<FlowState>,
}

/// Releases the popup message subscription when dropped, so the listener is
/// removed on success, failure, timeout, and caller cancellation alike.
struct ListenerGuard<'a> {
    window: &'a dyn WindowChannel,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.window.close();
    }
}

impl FlowController {
    pub fn new(
        config: FlowConfig,
        challenges: ChallengeStore,
        window: Arc<dyn WindowChannel>,
        exchanger: Arc<dyn TokenExchanger>,
        identity_sink: Arc<dyn IdentitySink>,
    ) -> Self {
        Self {
            config,
            challenges,
            window,
            exchanger,
            identity_sink,
            state: Mutex::new(FlowState::Idle),
        }
    }

    /// Current attempt state, for host observability.
    pub fn state(&self) -> FlowState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: FlowState) {
        debug!(state = ?next, "flow state");
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    /// Mark the attempt failed and log the internal detail. The returned
    /// error's `user_message()` is all the user should ever see.
    fn fail(&self, err: FlowError) -> FlowError {
        self.set_state(FlowState::Failed);
        warn!(error = %err, "sign-on attempt failed");
        err
    }

    /// Generate and store a fresh state (and verifier, under PKCE), and
    /// build the authorization URL carrying their public halves.
    fn begin_attempt(&self) -> Result<String> {
        let attempt_id = Uuid::new_v4();
        let state = self.challenges.new_state()?;
        let challenge = if self.config.uses_pkce {
            Some(self.challenges.new_challenge()?)
        } else {
            None
        };
        info!(
            %attempt_id,
            uses_pkce = self.config.uses_pkce,
            "starting sign-on attempt"
        );
        Ok(pkce::build_authorize_url(
            &self.config.authorize_url,
            &state,
            challenge.as_deref(),
        ))
    }

    /// Redirect variant. Navigates the current context to the identity
    /// provider; this call is terminal for the attempt — the result arrives
    /// as a fresh page load that should call `complete_redirect()`.
    pub fn start_redirect_flow(&self) -> Result<()> {
        let url = self.begin_attempt().map_err(|e| self.fail(e))?;
        self.window.navigate(&url).map_err(|e| self.fail(e))?;
        self.set_state(FlowState::AwaitingCallback);
        Ok(())
    }

    /// Popup variant. Resolves at most once: with the identity on success,
    /// or with the first failure (validation, exchange, timeout). The
    /// message subscription is released in every exit path, including when
    /// the caller drops this future; the popup window itself is never
    /// force-closed.
    pub async fn start_popup_flow(&self) -> Result<String> {
        // Drop any subscription a previous attempt left behind before
        // registering a new one.
        self.window.close();

        let url = self.begin_attempt().map_err(|e| self.fail(e))?;
        self.window.open(&url).map_err(|e| self.fail(e))?;
        self.set_state(FlowState::AwaitingCallback);

        let listener = ListenerGuard {
            window: self.window.as_ref(),
        };
        let message =
            match tokio::time::timeout(self.config.popup_timeout(), self.window.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    return Err(self.fail(FlowError::Correlation(
                        "message channel closed before a callback arrived".into(),
                    )));
                }
                Err(_) => return Err(self.fail(FlowError::Timeout)),
            };
        // First message wins. Release the subscription before exchanging so
        // a second message can never reach this attempt.
        drop(listener);

        self.handle_callback(message.state.as_deref(), message.auth_code.as_deref())
            .await
    }

    /// Redirect-return entry point: pull `state` and `auth_code` out of the
    /// reloaded page's query string and run the common callback path.
    pub async fn complete_redirect(&self, query: &str) -> Result<String> {
        let state = query_param(query, "state");
        let auth_code = query_param(query, "auth_code");
        self.handle_callback(state.as_deref(), auth_code.as_deref())
            .await
    }

    /// The single validation-and-exchange path shared by both variants.
    ///
    /// Succeeds only when the callback carries both parameters, a stored
    /// attempt exists (state, and verifier under PKCE), and the received
    /// state exactly matches the stored one. Every other combination fails
    /// with `Correlation` before any transport call is made.
    pub async fn handle_callback(
        &self,
        received_state: Option<&str>,
        auth_code: Option<&str>,
    ) -> Result<String> {
        match self.validate_and_exchange(received_state, auth_code).await {
            Ok(identity) => {
                self.set_state(FlowState::Succeeded);
                self.identity_sink.report_identity(&identity);
                Ok(identity)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn validate_and_exchange(
        &self,
        received_state: Option<&str>,
        auth_code: Option<&str>,
    ) -> Result<String> {
        let received_state = non_empty(received_state)
            .ok_or_else(|| FlowError::Correlation("callback carried no state".into()))?;
        let auth_code = non_empty(auth_code)
            .ok_or_else(|| FlowError::Correlation("callback carried no auth_code".into()))?;

        let saved_state = self
            .challenges
            .saved_state()?
            .ok_or_else(|| FlowError::Correlation("no sign-on attempt is outstanding".into()))?;
        let verifier: Option<Secret<String>> = if self.config.uses_pkce {
            Some(self.challenges.saved_verifier()?.ok_or_else(|| {
                FlowError::Correlation("outstanding attempt has no stored verifier".into())
            })?)
        } else {
            None
        };

        // Exact match only. A mismatch means the callback belongs to a
        // different (possibly attacker-initiated) attempt.
        if received_state != saved_state {
            return Err(FlowError::Correlation(
                "state does not match the outstanding attempt".into(),
            ));
        }
        self.set_state(FlowState::Validated);

        self.set_state(FlowState::Exchanging);
        let token = self
            .exchanger
            .exchange(auth_code, verifier.as_ref().map(|v| v.expose().as_str()))
            .await?;

        // The verifier is consumed: clear the slots before anything else so
        // a replayed callback cannot reuse this attempt.
        self.challenges.clear()?;

        Ok(claims::decode_identity(&token.access_token)?)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Extract a raw query parameter value. Values are opaque unpadded base64url
/// tokens on this wire, so no percent-decoding is involved.
fn query_param(query: &str, name: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use sso_auth::pkce::{SecureRandomSource, Sha256Digest};
    use sso_auth::{BearerToken, Error as AuthError};

    use crate::account::CurrentUser;
    use crate::store::{KeyValueStore, MemoryStore, STATE_SLOT, VERIFIER_SLOT};
    use crate::window::{CallbackMessage, InProcessChannel};

    /// Deterministic randomness: the n-th fill writes byte value n.
    #[derive(Default)]
    struct ScriptedRandom {
        counter: AtomicU8,
    }

    impl SecureRandomSource for ScriptedRandom {
        fn fill(&self, buf: &mut [u8]) {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            buf.fill(n);
        }
    }

    /// Transport fake with call counting and argument capture.
    struct FakeExchanger {
        calls: AtomicUsize,
        last_args: Mutex<Option<(String, Option<String>)>>,
        access_token: String,
        reject: bool,
    }

    impl FakeExchanger {
        fn returning(access_token: String) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_args: Mutex::new(None),
                access_token,
                reject: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::returning(String::new())
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_args(&self) -> Option<(String, Option<String>)> {
            self.last_args.lock().unwrap().clone()
        }
    }

    impl TokenExchanger for FakeExchanger {
        fn exchange<'a>(
            &'a self,
            auth_code: &'a str,
            code_verifier: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = sso_auth::Result<BearerToken>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock().unwrap() =
                Some((auth_code.to_owned(), code_verifier.map(str::to_owned)));
            Box::pin(async move {
                if self.reject {
                    Err(AuthError::Exchange("identity provider rejected the code".into()))
                } else {
                    Ok(BearerToken {
                        access_token: self.access_token.clone(),
                    })
                }
            })
        }
    }

    /// Compact token whose payload holds `custom.email`.
    fn token_for(email: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(format!(r#"{{"custom":{{"email":"{email}"}}}}"#).as_bytes());
        format!("{header}.{payload}.sig")
    }

    struct Harness {
        controller: Arc<FlowController>,
        slots: Arc<MemoryStore>,
        channel: Arc<InProcessChannel>,
        exchanger: Arc<FakeExchanger>,
        user: Arc<CurrentUser>,
    }

    impl Harness {
        fn saved_state(&self) -> Option<String> {
            self.slots.get(STATE_SLOT).unwrap()
        }

        fn saved_verifier(&self) -> Option<String> {
            self.slots.get(VERIFIER_SLOT).unwrap()
        }
    }

    fn harness_with(exchanger: FakeExchanger, uses_pkce: bool) -> Harness {
        let slots = Arc::new(MemoryStore::new());
        let channel = Arc::new(InProcessChannel::new());
        let exchanger = Arc::new(exchanger);
        let user = Arc::new(CurrentUser::new());

        let challenges = ChallengeStore::with_capabilities(
            slots.clone(),
            Arc::new(ScriptedRandom::default()),
            Arc::new(Sha256Digest),
        );
        let mut config = FlowConfig::new(
            "https://idp.example.com/authorize",
            "https://idp.example.com/token",
        );
        config.uses_pkce = uses_pkce;

        let controller = Arc::new(FlowController::new(
            config,
            challenges,
            channel.clone(),
            exchanger.clone(),
            user.clone(),
        ));
        Harness {
            controller,
            slots,
            channel,
            exchanger,
            user,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeExchanger::returning(token_for("user@example.com")), true)
    }

    /// Let a spawned flow task run up to its await point.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn redirect_flow_navigates_with_state_and_challenge() {
        let h = harness();
        h.controller.start_redirect_flow().unwrap();

        let url = h.channel.last_navigation().expect("navigated");
        let state = h.saved_state().expect("state stored");
        let verifier = h.saved_verifier().expect("verifier stored");
        let challenge = pkce::compute_challenge(&Sha256Digest, &verifier);
        assert_eq!(
            url,
            format!("https://idp.example.com/authorize?state={state}&challenge_code={challenge}")
        );
        assert_eq!(h.controller.state(), FlowState::AwaitingCallback);
    }

    #[tokio::test]
    async fn valid_callback_exchanges_and_reports_identity_once() {
        let h = harness();
        h.controller.start_redirect_flow().unwrap();
        let state = h.saved_state().unwrap();
        let verifier = h.saved_verifier().unwrap();

        let identity = h
            .controller
            .handle_callback(Some(&state), Some("authcode1"))
            .await
            .unwrap();

        assert_eq!(identity, "user@example.com");
        assert_eq!(h.exchanger.call_count(), 1);
        assert_eq!(
            h.exchanger.last_args(),
            Some(("authcode1".into(), Some(verifier)))
        );
        assert_eq!(h.user.current().as_deref(), Some("user@example.com"));
        assert_eq!(h.controller.state(), FlowState::Succeeded);

        // Single-use: both slots are gone after success.
        assert!(h.saved_state().is_none());
        assert!(h.saved_verifier().is_none());
    }

    #[tokio::test]
    async fn complete_redirect_parses_the_query_string() {
        let h = harness();
        h.controller.start_redirect_flow().unwrap();
        let state = h.saved_state().unwrap();

        let identity = h
            .controller
            .complete_redirect(&format!("?auth_code=authcode1&state={state}"))
            .await
            .unwrap();
        assert_eq!(identity, "user@example.com");
    }

    #[tokio::test]
    async fn mismatched_state_fails_without_touching_the_transport() {
        let h = harness();
        h.controller.start_redirect_flow().unwrap();

        let err = h
            .controller
            .handle_callback(Some("wrong-state"), Some("authcode1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Correlation(_)));
        assert_eq!(h.exchanger.call_count(), 0);
        assert_eq!(h.controller.state(), FlowState::Failed);
        assert!(h.user.current().is_none());
    }

    #[tokio::test]
    async fn prefix_of_the_saved_state_does_not_match() {
        let h = harness();
        h.controller.start_redirect_flow().unwrap();
        let state = h.saved_state().unwrap();
        let truncated = &state[..state.len() - 1];

        let err = h
            .controller
            .handle_callback(Some(truncated), Some("authcode1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Correlation(_)));
        assert_eq!(h.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_parameters_fail_correlation() {
        let h = harness();
        h.controller.start_redirect_flow().unwrap();
        let state = h.saved_state().unwrap();

        for (received_state, auth_code) in [
            (None, Some("authcode1")),
            (Some(state.as_str()), None),
            (Some(""), Some("authcode1")),
            (Some(state.as_str()), Some("")),
            (None, None),
        ] {
            let err = h
                .controller
                .handle_callback(received_state, auth_code)
                .await
                .unwrap_err();
            assert!(
                matches!(err, FlowError::Correlation(_)),
                "({received_state:?}, {auth_code:?}) should fail correlation"
            );
        }
        assert_eq!(h.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn callback_without_an_outstanding_attempt_fails() {
        let h = harness();
        let err = h
            .controller
            .handle_callback(Some("any-state"), Some("authcode1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Correlation(_)));
        assert_eq!(h.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn stored_state_without_verifier_fails_under_pkce() {
        let h = harness();
        h.slots.set(STATE_SLOT, "abc123").unwrap();

        let err = h
            .controller
            .handle_callback(Some("abc123"), Some("authcode1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Correlation(_)));
        assert_eq!(h.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn starting_a_new_attempt_invalidates_the_previous_one() {
        let h = harness();
        h.controller.start_redirect_flow().unwrap();
        let first_state = h.saved_state().unwrap();

        h.controller.start_redirect_flow().unwrap();
        assert_ne!(h.saved_state().unwrap(), first_state);

        let err = h
            .controller
            .handle_callback(Some(&first_state), Some("authcode1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Correlation(_)));
        assert_eq!(h.exchanger.call_count(), 0);
    }

    #[tokio::test]
    async fn rejected_exchange_fails_the_attempt() {
        let h = harness_with(FakeExchanger::rejecting(), true);
        h.controller.start_redirect_flow().unwrap();
        let state = h.saved_state().unwrap();

        let err = h
            .controller
            .handle_callback(Some(&state), Some("authcode1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Exchange(_)));
        assert_eq!(h.exchanger.call_count(), 1);
        assert_eq!(h.controller.state(), FlowState::Failed);
        assert!(h.user.current().is_none());
        // Failure does not clear the slots; the next attempt overwrites them.
        assert!(h.saved_state().is_some());
    }

    #[tokio::test]
    async fn undecodable_token_fails_after_consuming_the_attempt() {
        let h = harness_with(FakeExchanger::returning("not-a-compact-token".into()), true);
        h.controller.start_redirect_flow().unwrap();
        let state = h.saved_state().unwrap();

        let err = h
            .controller
            .handle_callback(Some(&state), Some("authcode1"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MalformedToken(_)));
        assert!(h.user.current().is_none());
        // The exchange succeeded, so the verifier was consumed.
        assert!(h.saved_state().is_none());
        assert!(h.saved_verifier().is_none());
    }

    #[tokio::test]
    async fn correlation_and_exchange_failures_share_one_user_message() {
        let h = harness_with(FakeExchanger::rejecting(), true);
        h.controller.start_redirect_flow().unwrap();
        let state = h.saved_state().unwrap();

        let correlation = h
            .controller
            .handle_callback(Some("wrong"), Some("authcode1"))
            .await
            .unwrap_err();
        let exchange = h
            .controller
            .handle_callback(Some(&state), Some("authcode1"))
            .await
            .unwrap_err();
        assert_eq!(correlation.user_message(), exchange.user_message());
    }

    #[tokio::test(start_paused = true)]
    async fn popup_flow_resolves_with_the_identity() {
        let h = harness();
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.start_popup_flow().await });
        settle().await;

        let url = h.channel.last_popup().expect("popup opened");
        let state = h.saved_state().unwrap();
        assert!(url.contains(&format!("state={state}")));
        assert!(url.contains("challenge_code="));

        h.channel.post(CallbackMessage {
            state: Some(state),
            auth_code: Some("authcode1".into()),
        });

        let identity = task.await.unwrap().unwrap();
        assert_eq!(identity, "user@example.com");
        assert!(!h.channel.has_listener(), "listener released after success");
    }

    #[tokio::test(start_paused = true)]
    async fn popup_flow_honors_only_the_first_message() {
        let h = harness();
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.start_popup_flow().await });
        settle().await;

        let state = h.saved_state().unwrap();
        h.channel.post(CallbackMessage {
            state: Some(state.clone()),
            auth_code: Some("first-code".into()),
        });
        h.channel.post(CallbackMessage {
            state: Some(state),
            auth_code: Some("second-code".into()),
        });

        task.await.unwrap().unwrap();
        assert_eq!(h.exchanger.call_count(), 1);
        assert_eq!(h.exchanger.last_args().unwrap().0, "first-code");
    }

    #[tokio::test(start_paused = true)]
    async fn popup_flow_times_out_and_releases_the_listener() {
        let h = harness();
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.start_popup_flow().await });

        // No message ever arrives; paused time fast-forwards to the deadline.
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, FlowError::Timeout));
        assert!(!h.channel.has_listener(), "listener released after timeout");
        assert_eq!(h.exchanger.call_count(), 0);
        assert!(h.user.current().is_none());
        assert_eq!(h.controller.state(), FlowState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn popup_message_with_missing_fields_fails_correlation() {
        let h = harness();
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.start_popup_flow().await });
        settle().await;

        h.channel.post(CallbackMessage {
            state: None,
            auth_code: Some("authcode1".into()),
        });

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, FlowError::Correlation(_)));
        assert_eq!(h.exchanger.call_count(), 0);
        assert!(!h.channel.has_listener());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_the_popup_flow_releases_the_listener() {
        let h = harness();
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.start_popup_flow().await });
        settle().await;
        assert!(h.channel.has_listener());

        // Caller walks away before any callback arrives.
        task.abort();
        let _ = task.await;
        assert!(!h.channel.has_listener(), "cancellation must not leak the listener");
    }

    #[tokio::test]
    async fn non_pkce_flow_skips_verifier_and_challenge() {
        let h = harness_with(
            FakeExchanger::returning(token_for("legacy@example.com")),
            false,
        );
        h.controller.start_redirect_flow().unwrap();

        let url = h.channel.last_navigation().unwrap();
        assert!(!url.contains("challenge_code="), "got {url}");
        assert!(h.saved_verifier().is_none());

        let state = h.saved_state().unwrap();
        let identity = h
            .controller
            .handle_callback(Some(&state), Some("authcode1"))
            .await
            .unwrap();
        assert_eq!(identity, "legacy@example.com");
        assert_eq!(
            h.exchanger.last_args(),
            Some(("authcode1".into(), None)),
            "non-PKCE exchange must not send a verifier"
        );
    }

    #[test]
    fn query_param_extraction() {
        assert_eq!(
            query_param("?state=abc&auth_code=xyz", "state").as_deref(),
            Some("abc")
        );
        assert_eq!(
            query_param("auth_code=xyz&state=abc", "auth_code").as_deref(),
            Some("xyz")
        );
        assert_eq!(query_param("state=abc", "auth_code"), None);
        assert_eq!(query_param("", "state"), None);
    }
}
