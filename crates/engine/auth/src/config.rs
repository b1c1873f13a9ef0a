use crate::extension;
use crate::session::markers;
use crate::storage::FileStore;
use crate::{Error, Result};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the login flow.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the Admarket API (the session endpoint is joined onto it).
    pub api_url: Url,
    /// How long the signing extension gets to report a public key.
    pub extension_timeout: Duration,
    /// Pause before the post-login navigation so fresh cookies are committed.
    pub redirect_delay: Duration,
    /// Path of the login page, target of forced logouts.
    pub login_path: String,
    /// Where to go after login when nothing better is known.
    pub default_destination: String,
    /// Sessions older than this must re-authenticate.
    pub session_max_age: Duration,
    /// Directory for file-backed client storage.
    pub data_dir: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            extension_timeout: extension::DEFAULT_TIMEOUT,
            redirect_delay: DEFAULT_REDIRECT_DELAY,
            login_path: "/login".into(),
            default_destination: "/dashboard".into(),
            session_max_age: markers::DEFAULT_MAX_AGE,
            data_dir: FileStore::default_dir(),
        }
    }
}

const DEFAULT_API_URL: &str = "http://localhost:3000";

const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(500);

impl AuthConfig {
    /// Builds a configuration from `ADMARKET_*` environment variables,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = match lookup("ADMARKET_API_URL") {
            Some(raw) => Url::parse(&raw)
                .map_err(|e| Error::Config(format!("ADMARKET_API_URL {:?}: {}", raw, e)))?,
            None => defaults.api_url,
        };
        let extension_timeout = lookup("ADMARKET_EXTENSION_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .map(extension::clamp_timeout)
            .unwrap_or(defaults.extension_timeout);
        let redirect_delay = lookup("ADMARKET_REDIRECT_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.redirect_delay);
        let login_path = lookup("ADMARKET_LOGIN_PATH").unwrap_or(defaults.login_path);
        let default_destination =
            lookup("ADMARKET_DEFAULT_DESTINATION").unwrap_or(defaults.default_destination);
        let session_max_age = lookup("ADMARKET_SESSION_MAX_AGE_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_max_age);
        let data_dir = lookup("ADMARKET_DATA")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        if !login_path.starts_with('/') {
            return Err(Error::Config(format!(
                "ADMARKET_LOGIN_PATH must be an absolute path, got {:?}",
                login_path
            )));
        }

        Ok(Self {
            api_url,
            extension_timeout,
            redirect_delay,
            login_path,
            default_destination,
            session_max_age,
            data_dir,
        })
    }
}
