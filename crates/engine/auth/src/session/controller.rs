//! Login controller
//!
//! Drives the session bootstrap: detect the signing extension, obtain a
//! public key (or a synthetic test identity), create the backend session,
//! write the session markers and navigate away.
//!
//! ```text
//! Anonymous ──mount──▶ AwaitingExtension ──login──▶ Authenticating ──▶ Authenticated
//!     ▲                                                   │
//!     └──────────────── force_logout ◀────────────────────┴──▶ Failed
//! ```
//!
//! Every login starts a new [`Attempt`]. A response that arrives for an
//! attempt that is no longer current is dropped without touching the status
//! or the markers, so a slow extension cannot resurrect a failed or
//! superseded login.

use super::backend::{BackendError, LoginRequest, LoginResponse, SessionBackend};
use super::markers::{ClientSessionStore, MarkerState, SessionMarkers, SessionStore};
use super::reset::{self, ResetReport};
use crate::config::AuthConfig;
use crate::extension::{Attempt, AttemptCounter, ExtensionError};
use crate::forms::FormErrorState;
use crate::identity::Identity;
use crate::keys::KeyUtility;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Notice shown once after a forced logout or cache clear.
pub const FORCED_LOGOUT_NOTICE: &str =
    "You have been logged out and your session data was cleared. Please log in again.";

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session and no extension login offered yet.
    Anonymous,
    /// An extension is installed; waiting for the user to log in with it.
    AwaitingExtension,
    /// A login attempt is in flight.
    Authenticating,
    /// A session is established.
    Authenticated,
    /// The last login attempt failed.
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::AwaitingExtension => write!(f, "AwaitingExtension"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Authenticated => write!(f, "Authenticated"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Why a login attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginFailure {
    #[error("no signing extension installed")]
    ExtensionAbsent,

    #[error("signing extension did not respond")]
    ExtensionTimeout,

    #[error("signing request denied: {0}")]
    UserDenied(String),

    #[error("signing extension failed: {0}")]
    ExtensionFailed(String),

    #[error("session request rejected with status {status}")]
    BackendRejected { status: u16, message: Option<String> },

    #[error("malformed session response: {0}")]
    MalformedResponse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("session could not be stored: {0}")]
    Storage(String),
}

impl LoginFailure {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::ExtensionAbsent => {
                "No Nostr extension found. Install a NIP-07 signer such as Alby, then try again."
                    .into()
            }
            Self::ExtensionTimeout => {
                "Your Nostr extension did not respond. Check that it is unlocked and try again."
                    .into()
            }
            Self::UserDenied(_) => {
                "The request was declined in your Nostr extension. Approve it and try again.".into()
            }
            Self::ExtensionFailed(_) => {
                "Your Nostr extension sent an unusable answer. Check its settings and try again."
                    .into()
            }
            Self::BackendRejected { message, .. } => message
                .clone()
                .unwrap_or_else(|| "Login failed. Please try again.".into()),
            Self::MalformedResponse(_) => {
                "The server sent an unexpected response. Please try again later.".into()
            }
            Self::Network(_) => {
                "Could not reach the server. Check your connection and try again.".into()
            }
            Self::Storage(_) => {
                "Your browser blocked saving the session. Allow cookies and storage to log in."
                    .into()
            }
        }
    }
}

impl From<ExtensionError> for LoginFailure {
    fn from(err: ExtensionError) -> Self {
        match err {
            ExtensionError::Absent => Self::ExtensionAbsent,
            ExtensionError::Timeout(_) => Self::ExtensionTimeout,
            ExtensionError::Denied(reason) => Self::UserDenied(reason),
            ExtensionError::Failed(reason) | ExtensionError::InvalidPublicKey(reason) => {
                Self::ExtensionFailed(reason)
            }
            ExtensionError::Empty(what) => Self::ExtensionFailed(format!("no {} returned", what)),
        }
    }
}

impl From<BackendError> for LoginFailure {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected { status, message } => Self::BackendRejected { status, message },
            BackendError::MalformedResponse(reason) => Self::MalformedResponse(reason),
            BackendError::Network(reason) => Self::Network(reason),
        }
    }
}

/// Result of [`LoginController::mount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// A forced logout just happened; no auto redirect.
    Suppressed,
    /// A valid session exists; navigated to the destination.
    Redirected(String),
    /// Ready for the user to log in. Also returned when a login or logout
    /// took over before the auto redirect fired.
    Ready,
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated { identity: Identity, destination: String },
    Failed(LoginFailure),
    /// A newer attempt (or a logout) replaced this one; nothing was applied.
    Superseded,
}

/// Decides where a freshly authenticated user goes next.
#[async_trait]
pub trait OnboardingStatus: Send + Sync {
    async fn destination(&self, pubkey: &str) -> crate::Result<String>;
}

/// Onboarding collaborator that always answers the same URL.
#[derive(Debug, Clone)]
pub struct FixedDestination(pub String);

#[async_trait]
impl OnboardingStatus for FixedDestination {
    async fn destination(&self, _pubkey: &str) -> crate::Result<String> {
        Ok(self.0.clone())
    }
}

/// Performs full-page navigations.
///
/// Post-login navigation must not be a client-side route change: the next
/// page's server-side auth check has to see the cookies just written.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
}

/// Navigator that only logs, for hosts without a page to leave.
#[derive(Debug, Clone, Default)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn navigate(&self, url: &str) {
        info!("Navigate to {}", url);
    }
}

/// The login page controller.
pub struct LoginController {
    config: AuthConfig,
    keys: KeyUtility,
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn SessionBackend>,
    onboarding: Arc<dyn OnboardingStatus>,
    navigator: Arc<dyn Navigator>,
    status: watch::Sender<SessionStatus>,
    status_rx: watch::Receiver<SessionStatus>,
    form: Mutex<FormErrorState>,
    notice: Mutex<Option<String>>,
    identity: Mutex<Option<Identity>>,
    attempts: AttemptCounter,
}

impl LoginController {
    /// Create a controller whose session markers live in the key utility's
    /// client storage.
    pub fn new(
        config: AuthConfig,
        keys: KeyUtility,
        backend: Arc<dyn SessionBackend>,
        onboarding: Arc<dyn OnboardingStatus>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let store = ClientSessionStore::new(keys.storage().clone())
            .with_max_age(config.session_max_age);
        let keys = keys.with_timeout(config.extension_timeout);
        let (status, status_rx) = watch::channel(SessionStatus::Anonymous);

        Self {
            config,
            keys,
            store: Arc::new(store),
            backend,
            onboarding,
            navigator,
            status,
            status_rx,
            form: Mutex::new(FormErrorState::empty()),
            notice: Mutex::new(None),
            identity: Mutex::new(None),
            attempts: AttemptCounter::new(),
        }
    }

    /// Replace the session store.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    pub fn form_state(&self) -> FormErrorState {
        self.form.lock().clone()
    }

    /// Take the one-time notice, if any.
    pub fn take_notice(&self) -> Option<String> {
        self.notice.lock().take()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.lock().clone()
    }

    pub fn keys(&self) -> &KeyUtility {
        &self.keys
    }

    fn set_status(&self, status: SessionStatus) {
        debug!("Session status -> {}", status);
        self.status.send_replace(status);
    }

    /// Run the page-load checks for `current_url`.
    pub async fn mount(&self, current_url: &str) -> MountOutcome {
        let forced = reset::is_post_forced_logout(current_url);
        // Always consume the one-shot flag, even when the URL already matched
        let prevented = self.store.take_prevent_auto_login();

        if forced || prevented {
            info!("Post forced-logout load, auto login suppressed");
            *self.notice.lock() = Some(FORCED_LOGOUT_NOTICE.to_string());
            self.set_status(SessionStatus::Anonymous);
            return MountOutcome::Suppressed;
        }

        match self.store.read() {
            Ok(MarkerState::Valid(markers)) => {
                // A login or logout started from here on takes over the page
                let attempt = self.attempts.current();
                let identity = identity_for(&markers, &self.keys);
                *self.identity.lock() = Some(identity);
                self.set_status(SessionStatus::Authenticated);

                let destination = self.resolve_destination(&markers.pubkey, None).await;
                if !self.navigate_after_delay(attempt, &destination).await {
                    return MountOutcome::Ready;
                }
                return MountOutcome::Redirected(destination);
            }
            Ok(MarkerState::Untrusted(reason)) => {
                warn!("Discarding untrusted session markers: {}", reason);
                self.clear_markers();
            }
            Ok(MarkerState::Stale(markers)) => {
                info!("Session for {} expired, re-authentication required", markers.pubkey);
                self.clear_markers();
            }
            Ok(MarkerState::Absent) => {}
            Err(err) => warn!("Failed to read session markers: {}", err),
        }

        if self.keys.has_extension() {
            self.set_status(SessionStatus::AwaitingExtension);
        } else {
            self.set_status(SessionStatus::Anonymous);
        }
        MountOutcome::Ready
    }

    /// Log in through the signing extension.
    pub async fn login_with_extension(&self) -> LoginOutcome {
        let attempt = self.attempts.next();

        if !self.keys.has_extension() {
            return self.fail(attempt, LoginFailure::ExtensionAbsent);
        }

        let initiated_at = self.begin(attempt);

        let pubkey = match self.keys.request_public_key().await {
            Ok(pubkey) => pubkey,
            Err(err) => return self.fail(attempt, err.into()),
        };
        if !self.attempts.is_current(attempt) {
            return LoginOutcome::Superseded;
        }

        let request = LoginRequest {
            pubkey: pubkey.clone(),
            is_test: false,
            timestamp: crate::unix_time_millis(),
        };
        let response = match self.backend.login(&request).await {
            Ok(response) => response,
            Err(err) => return self.fail(attempt, err.into()),
        };
        if !self.attempts.is_current(attempt) {
            return LoginOutcome::Superseded;
        }

        let markers = SessionMarkers {
            pubkey: pubkey.clone(),
            token: response.token.clone(),
            test_mode: false,
            initiated_at,
            authenticated_at: crate::unix_time_millis(),
        };
        if let Err(err) = self.store.write(&markers) {
            return self.fail(attempt, LoginFailure::Storage(err.to_string()));
        }

        self.complete(attempt, Identity::from_extension(pubkey), &response)
            .await
    }

    /// Log in with a fresh synthetic test identity.
    ///
    /// A backend failure does not fail the login: the session proceeds on the
    /// locally written markers alone.
    pub async fn login_with_test_mode(&self) -> LoginOutcome {
        let attempt = self.attempts.next();
        let initiated_at = self.begin(attempt);

        let pair = self.keys.generate_test_key_pair();
        let request = LoginRequest {
            pubkey: pair.public_key.clone(),
            is_test: true,
            timestamp: crate::unix_time_millis(),
        };

        let response = match self.backend.login(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!("Test-mode session request failed, continuing locally: {}", err);
                LoginResponse::default()
            }
        };
        if !self.attempts.is_current(attempt) {
            return LoginOutcome::Superseded;
        }

        let markers = SessionMarkers {
            pubkey: pair.public_key.clone(),
            token: response.token.clone(),
            test_mode: true,
            initiated_at,
            authenticated_at: crate::unix_time_millis(),
        };
        if let Err(err) = self.store.write(&markers) {
            warn!("Failed to store test-mode session markers: {}", err);
        }

        self.complete(attempt, Identity::from(&pair), &response).await
    }

    /// Wipe all client state and navigate to the login page.
    pub fn force_logout(&self) -> ResetReport {
        // Anything still in flight must not land after the wipe
        self.attempts.next();

        let report = reset::reset_all(
            self.keys.storage(),
            self.navigator.as_ref(),
            &self.config.login_path,
        );
        *self.identity.lock() = None;
        *self.form.lock() = FormErrorState::empty();
        self.set_status(SessionStatus::Anonymous);
        report
    }

    /// Clear leftovers from earlier attempts and enter `Authenticating`.
    /// Returns the initiation timestamp.
    fn begin(&self, attempt: Attempt) -> u64 {
        debug!("Login attempt {} started", attempt.sequence());
        // Must finish before anything for this attempt is written
        self.clear_markers();
        *self.identity.lock() = None;
        *self.form.lock() = FormErrorState::empty();
        self.set_status(SessionStatus::Authenticating);
        crate::unix_time_millis()
    }

    fn clear_markers(&self) {
        if let Err(err) = self.store.clear() {
            warn!("Failed to clear session markers: {}", err);
        }
    }

    fn fail(&self, attempt: Attempt, failure: LoginFailure) -> LoginOutcome {
        if !self.attempts.is_current(attempt) {
            debug!("Dropping failure of superseded attempt {}", attempt.sequence());
            return LoginOutcome::Superseded;
        }

        warn!("Login failed: {}", failure);
        *self.form.lock() = FormErrorState::with_form_error(failure.user_message());
        self.set_status(SessionStatus::Failed);
        LoginOutcome::Failed(failure)
    }

    async fn complete(
        &self,
        attempt: Attempt,
        identity: Identity,
        response: &LoginResponse,
    ) -> LoginOutcome {
        info!("Authenticated as {}", identity.short_key());
        *self.identity.lock() = Some(identity.clone());
        self.set_status(SessionStatus::Authenticated);

        let destination = self
            .resolve_destination(identity.public_key(), response.redirect_url.as_deref())
            .await;

        if !self.navigate_after_delay(attempt, &destination).await {
            return LoginOutcome::Superseded;
        }

        LoginOutcome::Authenticated {
            identity,
            destination,
        }
    }

    async fn resolve_destination(&self, pubkey: &str, backend_redirect: Option<&str>) -> String {
        match self.onboarding.destination(pubkey).await {
            Ok(url) => url,
            Err(err) => {
                warn!("Onboarding status unavailable: {}", err);
                backend_redirect
                    .map(str::to_string)
                    .unwrap_or_else(|| self.config.default_destination.clone())
            }
        }
    }

    /// Wait for the redirect delay, then hard-navigate unless a newer attempt
    /// or a logout has taken over since `attempt` began. Returns whether the
    /// navigation happened.
    async fn navigate_after_delay(&self, attempt: Attempt, destination: &str) -> bool {
        if self.attempts.is_current(attempt) {
            tokio::time::sleep(self.config.redirect_delay).await;
        }

        if !self.attempts.is_current(attempt) {
            debug!("Skipping navigation to {}, session changed", destination);
            return false;
        }
        self.navigator.navigate(destination);
        true
    }
}

/// Rebuild the identity behind a restored session.
fn identity_for(markers: &SessionMarkers, keys: &KeyUtility) -> Identity {
    if markers.test_mode {
        if let Some(stored) = keys.get_stored_test_keys() {
            if stored.public_key() == markers.pubkey {
                return stored;
            }
        }
        return Identity::from_test_public_key(markers.pubkey.clone());
    }
    Identity::from_extension(markers.pubkey.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages_are_distinct() {
        let failures = [
            LoginFailure::ExtensionAbsent,
            LoginFailure::ExtensionTimeout,
            LoginFailure::UserDenied("no".into()),
            LoginFailure::ExtensionFailed("bad key".into()),
            LoginFailure::BackendRejected {
                status: 500,
                message: None,
            },
            LoginFailure::MalformedResponse("eof".into()),
            LoginFailure::Network("refused".into()),
            LoginFailure::Storage("quota".into()),
        ];

        let messages: std::collections::BTreeSet<String> =
            failures.iter().map(LoginFailure::user_message).collect();
        assert_eq!(messages.len(), failures.len());
    }

    #[test]
    fn test_backend_message_is_surfaced() {
        let failure = LoginFailure::BackendRejected {
            status: 403,
            message: Some("Account suspended".into()),
        };
        assert_eq!(failure.user_message(), "Account suspended");
    }

    #[test]
    fn test_extension_error_mapping() {
        assert_eq!(
            LoginFailure::from(ExtensionError::Absent),
            LoginFailure::ExtensionAbsent
        );
        assert_eq!(
            LoginFailure::from(ExtensionError::Timeout(std::time::Duration::from_secs(3))),
            LoginFailure::ExtensionTimeout
        );
        assert!(matches!(
            LoginFailure::from(ExtensionError::Denied("rejected".into())),
            LoginFailure::UserDenied(_)
        ));
        assert!(matches!(
            LoginFailure::from(ExtensionError::Failed("crashed".into())),
            LoginFailure::ExtensionFailed(_)
        ));
        assert!(matches!(
            LoginFailure::from(ExtensionError::Empty("public key")),
            LoginFailure::ExtensionFailed(_)
        ));
        assert!(matches!(
            LoginFailure::from(ExtensionError::InvalidPublicKey("zz".into())),
            LoginFailure::ExtensionFailed(_)
        ));
    }

    #[test]
    fn test_backend_error_mapping() {
        assert!(matches!(
            LoginFailure::from(BackendError::MalformedResponse("x".into())),
            LoginFailure::MalformedResponse(_)
        ));
        assert!(matches!(
            LoginFailure::from(BackendError::Network("x".into())),
            LoginFailure::Network(_)
        ));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::AwaitingExtension.to_string(), "AwaitingExtension");
        assert_eq!(SessionStatus::Failed.to_string(), "Failed");
    }
}
