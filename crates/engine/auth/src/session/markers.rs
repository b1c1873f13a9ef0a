//! Session markers
//!
//! A session is not one record but a group of cookies and storage flags. The
//! group is only trusted when it is complete and self-consistent; anything
//! partial means a previous login was interrupted or tampered with, and the
//! user has to authenticate again.

use crate::identity::is_test_public_key;
use crate::storage::{keys, ClientStorage, StorageError, StorageResult};
use std::time::Duration;
use tracing::{debug, warn};

/// Default lifetime of an established session.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// The marker group describing one established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMarkers {
    pub pubkey: String,
    /// Absent for degraded test-mode sessions
    pub token: Option<String>,
    pub test_mode: bool,
    /// Epoch millis when the login attempt started.
    pub initiated_at: u64,
    /// Epoch millis when the session was established.
    pub authenticated_at: u64,
}

/// What [`SessionStore::read`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    /// No session markers at all.
    Absent,
    /// A complete, consistent, fresh group.
    Valid(SessionMarkers),
    /// A complete group older than the maximum session age.
    Stale(SessionMarkers),
    /// A partial or contradictory group.
    Untrusted(String),
}

impl MarkerState {
    pub fn is_valid(&self) -> bool {
        matches!(self, MarkerState::Valid(_))
    }
}

/// Reads and writes the session marker group as a unit.
pub trait SessionStore: Send + Sync {
    fn read(&self) -> StorageResult<MarkerState>;

    /// Write the whole group. On failure nothing from this call is left
    /// behind.
    fn write(&self, markers: &SessionMarkers) -> StorageResult<()>;

    /// Remove every marker. Test keys and the auto-login flag are untouched.
    fn clear(&self) -> StorageResult<()>;

    /// Consume the one-shot `prevent_auto_login` flag.
    fn take_prevent_auto_login(&self) -> bool;
}

/// [`SessionStore`] over client cookies and local storage.
#[derive(Debug, Clone)]
pub struct ClientSessionStore {
    storage: ClientStorage,
    max_age: Duration,
}

impl ClientSessionStore {
    pub fn new(storage: ClientStorage) -> Self {
        Self {
            storage,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn read_local(&self, key: &str) -> StorageResult<Option<String>> {
        match self.storage.local() {
            Some(local) => local.get(key),
            None => Ok(None),
        }
    }

    fn read_cookie(&self, name: &str) -> StorageResult<Option<String>> {
        match self.storage.cookies() {
            Some(cookies) => cookies.get(name),
            None => Ok(None),
        }
    }

    fn write_all(&self, markers: &SessionMarkers) -> StorageResult<()> {
        let local = self
            .storage
            .local()
            .ok_or_else(|| StorageError::Unavailable("no local storage".into()))?;
        let cookies = self
            .storage
            .cookies()
            .ok_or_else(|| StorageError::Unavailable("no cookie jar".into()))?;

        if markers.test_mode {
            local.set(keys::TEST_MODE, "true")?;
        } else {
            local.remove(keys::TEST_MODE)?;
        }
        local.set(keys::AUTH_INITIATED, &markers.initiated_at.to_string())?;
        local.set(keys::AUTH_PUBKEY, &markers.pubkey)?;
        local.set(keys::AUTH_TIMESTAMP, &markers.authenticated_at.to_string())?;

        match &markers.token {
            Some(token) => cookies.set(keys::TOKEN_COOKIE, token)?,
            None => cookies.remove(keys::TOKEN_COOKIE)?,
        }
        // Pubkey cookie last: its presence is what marks the group as started
        cookies.set(keys::PUBKEY_COOKIE, &markers.pubkey)?;
        Ok(())
    }
}

fn parse_millis(name: &str, value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("{} is not a timestamp: {:?}", name, value))
}

impl SessionStore for ClientSessionStore {
    fn read(&self) -> StorageResult<MarkerState> {
        let pubkey = self.read_cookie(keys::PUBKEY_COOKIE)?;
        let token = self.read_cookie(keys::TOKEN_COOKIE)?;
        let test_mode = self.read_local(keys::TEST_MODE)?.is_some_and(|v| v == "true");
        let initiated = self.read_local(keys::AUTH_INITIATED)?;
        let auth_pubkey = self.read_local(keys::AUTH_PUBKEY)?;
        let auth_timestamp = self.read_local(keys::AUTH_TIMESTAMP)?;

        let Some(pubkey) = pubkey else {
            if token.is_some() || test_mode || initiated.is_some() || auth_pubkey.is_some() {
                return Ok(MarkerState::Untrusted(
                    "session markers present without a pubkey cookie".into(),
                ));
            }
            return Ok(MarkerState::Absent);
        };

        let Some(initiated) = initiated else {
            return Ok(MarkerState::Untrusted("pubkey cookie without auth_initiated".into()));
        };
        if auth_pubkey.as_deref() != Some(pubkey.as_str()) {
            return Ok(MarkerState::Untrusted("auth_pubkey does not match the cookie".into()));
        }
        if is_test_public_key(&pubkey) != test_mode {
            return Ok(MarkerState::Untrusted("test-mode flag does not match the pubkey".into()));
        }

        let initiated_at = match parse_millis(keys::AUTH_INITIATED, &initiated) {
            Ok(ms) => ms,
            Err(reason) => return Ok(MarkerState::Untrusted(reason)),
        };
        let authenticated_at = match auth_timestamp {
            Some(ts) => match parse_millis(keys::AUTH_TIMESTAMP, &ts) {
                Ok(ms) => ms,
                Err(reason) => return Ok(MarkerState::Untrusted(reason)),
            },
            None => initiated_at,
        };

        let markers = SessionMarkers {
            pubkey,
            token,
            test_mode,
            initiated_at,
            authenticated_at,
        };

        let age_ms = crate::unix_time_millis().saturating_sub(authenticated_at);
        if u128::from(age_ms) > self.max_age.as_millis() {
            return Ok(MarkerState::Stale(markers));
        }

        Ok(MarkerState::Valid(markers))
    }

    fn write(&self, markers: &SessionMarkers) -> StorageResult<()> {
        if let Err(err) = self.write_all(markers) {
            if let Err(clear_err) = self.clear() {
                warn!("Failed to roll back partial session markers: {}", clear_err);
            }
            return Err(err);
        }
        debug!("Session markers written for {}", markers.pubkey);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut first_error = None;

        if let Some(cookies) = self.storage.cookies() {
            for name in [keys::PUBKEY_COOKIE, keys::TOKEN_COOKIE] {
                if let Err(err) = cookies.remove(name) {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(local) = self.storage.local() {
            for key in [
                keys::TEST_MODE,
                keys::AUTH_INITIATED,
                keys::AUTH_PUBKEY,
                keys::AUTH_TIMESTAMP,
            ] {
                if let Err(err) = local.remove(key) {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn take_prevent_auto_login(&self) -> bool {
        let Some(local) = self.storage.local() else {
            return false;
        };

        match local.get(keys::PREVENT_AUTO_LOGIN) {
            Ok(Some(flag)) => {
                if let Err(err) = local.remove(keys::PREVENT_AUTO_LOGIN) {
                    warn!("Failed to consume prevent_auto_login: {}", err);
                }
                flag == "true"
            }
            Ok(None) => false,
            Err(err) => {
                warn!("Failed to read prevent_auto_login: {}", err);
                false
            }
        }
    }
}
