//! Forced logout
//!
//! Wipes every piece of client state and hard-navigates to the login page.
//! Used to recover from a session the normal flow cannot untangle.

use super::controller::Navigator;
use crate::storage::{keys, ClientStorage, StorageError};
use reqwest::Url;
use tracing::{info, warn};

/// Query marker added by a forced logout.
pub const FORCE_LOGOUT_PARAM: &str = "force_logout";

/// Query marker added when the client cache was cleared.
pub const CLEAR_CACHE_PARAM: &str = "clear_cache";

/// One isolated step of [`reset_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    LocalStorage,
    SessionStorage,
    Cookies,
    PreventAutoLogin,
}

/// What [`reset_all`] managed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    /// Steps that failed, with the reason
    pub failed: Vec<(ResetStep, String)>,
    /// Where the browser was sent
    pub redirect_url: String,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// URL of the login page carrying the forced-logout marker.
pub fn forced_logout_url(login_path: &str) -> String {
    let separator = if login_path.contains('?') { '&' } else { '?' };
    format!("{}{}{}=true", login_path, separator, FORCE_LOGOUT_PARAM)
}

/// Clear local storage, session storage and every cookie, set the one-shot
/// `prevent_auto_login` flag, then hard-navigate to the login page.
///
/// Each step runs on its own; a failing step is logged and recorded but does
/// not stop the ones after it.
pub fn reset_all(
    storage: &ClientStorage,
    navigator: &dyn Navigator,
    login_path: &str,
) -> ResetReport {
    let mut failed = Vec::new();

    if let Some(local) = storage.local() {
        if let Err(err) = local.clear() {
            record(&mut failed, ResetStep::LocalStorage, err);
        }
    }

    if let Some(session) = storage.session() {
        if let Err(err) = session.clear() {
            record(&mut failed, ResetStep::SessionStorage, err);
        }
    }

    if let Some(cookies) = storage.cookies() {
        match cookies.names() {
            Ok(names) => {
                for name in names {
                    if let Err(err) = cookies.remove(&name) {
                        record(&mut failed, ResetStep::Cookies, err);
                    }
                }
            }
            Err(err) => record(&mut failed, ResetStep::Cookies, err),
        }
    }

    if let Some(local) = storage.local() {
        if let Err(err) = local.set(keys::PREVENT_AUTO_LOGIN, "true") {
            record(&mut failed, ResetStep::PreventAutoLogin, err);
        }
    }

    let redirect_url = forced_logout_url(login_path);
    info!("Forced logout, redirecting to {}", redirect_url);
    navigator.navigate(&redirect_url);

    ResetReport {
        failed,
        redirect_url,
    }
}

fn record(failed: &mut Vec<(ResetStep, String)>, step: ResetStep, err: StorageError) {
    warn!("Reset step {:?} failed: {}", step, err);
    failed.push((step, err.to_string()));
}

/// Whether `url` carries a forced-logout or cache-clear marker.
///
/// Accepts absolute URLs and paths.
pub fn is_post_forced_logout(url: &str) -> bool {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => match Url::parse("http://localhost/").and_then(|base| base.join(url)) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        },
    };

    parsed.query_pairs().any(|(key, value)| {
        (key == FORCE_LOGOUT_PARAM || key == CLEAR_CACHE_PARAM) && value == "true"
    })
}
